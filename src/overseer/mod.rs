//! Overseer Worker: the background job that keeps a project's skills current.
//!
//! A worker is started by whoever won [`lock::acquire_or_notify`] and runs with the granted
//! token. It heartbeats the lock while it works, runs analysis passes, writes the
//! proposed edits through the Skill Store, and keeps looping while other processes set the
//! lock's pending flag. The lock is released when it finishes, when analysis fails, or
//! when the process is asked to shut down.

pub mod launcher;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::analysis::{AnalysisRequest, AnalysisResponse, Analyzer, Rejection, SessionSnapshot, SkillEdit};
use crate::config::OverseerConfig;
use crate::error::SkillsError;
use crate::skills::{self, ArtifactName};
use crate::state::lock::{self, PassEnd};
use crate::state::runlog::{self, RunOutcome};
use crate::state::{counters, project_key};

/// How a worker's run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    /// No pending work remained; the lock was released.
    #[default]
    Released,
    /// Analysis failed or timed out; the lock was released for a later retry.
    AnalysisFailed,
    /// Another process owns the lock now (it was reclaimed while we worked).
    Lost,
    /// The token was already stale when the worker started.
    NotAdopted,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub passes: u32,
    pub applied: usize,
    pub rejected: usize,
    pub truncated: usize,
    pub exit: RunExit,
}

struct Applied {
    rejections: Vec<Rejection>,
    lost: bool,
}

pub struct Overseer {
    db: Arc<Mutex<Connection>>,
    analyzer: Arc<dyn Analyzer>,
    project: PathBuf,
    key: String,
    token: String,
    config: OverseerConfig,
    skills_root: PathBuf,
}

impl Overseer {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        analyzer: Arc<dyn Analyzer>,
        project: &Path,
        token: &str,
        config: OverseerConfig,
        skills_root: PathBuf,
    ) -> Self {
        Self {
            db,
            analyzer,
            project: project.to_path_buf(),
            key: project_key(project),
            token: token.to_string(),
            config,
            skills_root,
        }
    }

    /// Run passes until no more work is pending.
    ///
    /// On an error the lock is released before returning, so a later trigger can retry.
    pub async fn run(&self) -> Result<RunSummary> {
        let (key, token) = (self.key.clone(), self.token.clone());
        let pid = std::process::id();
        let adopted = self
            .with_db(move |conn| lock::adopt(conn, &key, &token, pid, Utc::now()))
            .await?;
        if !adopted {
            tracing::warn!(project = %self.key, "overseer token is stale, exiting");
            return Ok(RunSummary {
                exit: RunExit::NotAdopted,
                ..RunSummary::default()
            });
        }
        tracing::info!(project = %self.key, pid, "overseer started");
        self.prune().await?;

        let lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.spawn_heartbeat(Arc::clone(&lost));

        let mut summary = RunSummary::default();
        let result = self.run_passes(&lost, &mut summary).await;
        heartbeat.abort();

        match result {
            Ok(()) => {
                tracing::info!(
                    project = %self.key,
                    passes = summary.passes,
                    applied = summary.applied,
                    rejected = summary.rejected,
                    exit = ?summary.exit,
                    "overseer finished"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(project = %self.key, error = %e, "overseer aborted");
                if let Err(release_err) = self.release().await {
                    tracing::warn!(error = %release_err, "failed to release lock after abort");
                }
                Err(e)
            }
        }
    }

    /// Give up the lock unconditionally. Returns whether this worker still held it.
    pub async fn release(&self) -> Result<bool> {
        let (key, token) = (self.key.clone(), self.token.clone());
        self.with_db(move |conn| lock::release(conn, &key, &token)).await
    }

    async fn run_passes(&self, lost: &AtomicBool, summary: &mut RunSummary) -> Result<()> {
        let mut pass = 0u32;
        loop {
            pass += 1;
            summary.passes = pass;
            tracing::info!(project = %self.key, pass, "overseer pass started");

            let request = self.snapshot(pass, Vec::new()).await?;
            let response = match self.analyze(&request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(project = %self.key, pass, error = %e, "analysis failed, releasing lock");
                    self.log(pass, RunOutcome::AnalysisFailed, None, Some(serde_json::json!({"error": e.to_string()})))
                        .await?;
                    self.release().await?;
                    summary.exit = RunExit::AnalysisFailed;
                    return Ok(());
                }
            };

            let mut applied = self.apply(pass, response.edits, summary).await?;

            let oversized = applied.rejections.iter().any(|r| r.lines.is_some());
            if !applied.lost && oversized && self.config.condense_on_reject {
                tracing::info!(
                    project = %self.key,
                    pass,
                    rejected = applied.rejections.len(),
                    "requesting condensed edits"
                );
                let request = self.snapshot(pass, applied.rejections).await?;
                match self.analyze(&request).await {
                    Ok(condensed) => applied = self.apply(pass, condensed.edits, summary).await?,
                    Err(e) => {
                        // Edits from the first round stay applied
                        tracing::warn!(project = %self.key, pass, error = %e, "condensation failed");
                        self.log(pass, RunOutcome::AnalysisFailed, None, Some(serde_json::json!({"error": e.to_string(), "condense": true})))
                            .await?;
                    }
                }
            }

            if applied.lost || lost.load(Ordering::SeqCst) {
                return self.stop_lost(pass, summary).await;
            }

            self.log(
                pass,
                RunOutcome::Completed,
                None,
                Some(serde_json::json!({
                    "applied": summary.applied,
                    "rejected": summary.rejected,
                    "summary": response.summary,
                })),
            )
            .await?;

            self.wait_idle_grace(lost).await?;

            let (key, token) = (self.key.clone(), self.token.clone());
            match self.with_db(move |conn| lock::finish_pass(conn, &key, &token)).await? {
                PassEnd::Continue => {
                    tracing::info!(project = %self.key, pass, "re-evaluation requested, running another pass");
                }
                PassEnd::Released => {
                    summary.exit = RunExit::Released;
                    return Ok(());
                }
                PassEnd::Lost => return self.stop_lost(pass, summary).await,
            }
        }
    }

    async fn stop_lost(&self, pass: u32, summary: &mut RunSummary) -> Result<()> {
        tracing::warn!(project = %self.key, pass, "overseer lock lost, stopping");
        self.log(pass, RunOutcome::Lost, None, None).await?;
        summary.exit = RunExit::Lost;
        Ok(())
    }

    /// Build the analysis input from current state. Called fresh for every pass so a pass
    /// triggered mid-run sees the data that caused it.
    async fn snapshot(&self, pass: u32, rejections: Vec<Rejection>) -> Result<AnalysisRequest> {
        let key = self.key.clone();
        let since = self.retention_cutoff();
        let sessions = self
            .with_db(move |conn| counters::recent_sessions(conn, &key, since))
            .await?;

        let root = self.skills_root.clone();
        let artifacts = tokio::task::spawn_blocking(move || skills::list(&root))
            .await
            .context("skill listing task failed")??;

        Ok(AnalysisRequest {
            project: self.project.to_string_lossy().into_owned(),
            // Sessions are ordered most recently active first
            transcript: sessions.iter().find_map(|s| s.transcript_path.clone()),
            sessions: sessions.iter().map(SessionSnapshot::from).collect(),
            artifacts,
            pass,
            rejections,
        })
    }

    /// Archived sessions ending before this are no longer shown to analysis.
    fn retention_cutoff(&self) -> DateTime<Utc> {
        let retention = chrono::Duration::from_std(self.config.session_retention())
            .unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Drop old archived sessions and run log entries of this project.
    async fn prune(&self) -> Result<()> {
        let key = self.key.clone();
        let cutoff = self.retention_cutoff();
        let keep = self.config.run_log_keep;
        let (sessions, runs) = self
            .with_db(move |conn| {
                Ok((
                    counters::prune_archived(conn, &key, cutoff)?,
                    runlog::prune(conn, &key, keep)?,
                ))
            })
            .await?;
        if sessions + runs > 0 {
            tracing::debug!(project = %self.key, sessions, runs, "pruned old state");
        }
        Ok(())
    }

    async fn analyze(&self, request: &AnalysisRequest) -> crate::error::Result<AnalysisResponse> {
        let timeout = self.config.analysis_timeout();
        match tokio::time::timeout(timeout, self.analyzer.analyze(request)).await {
            Ok(result) => result,
            Err(_) => Err(SkillsError::AnalysisTimeout(timeout.as_secs())),
        }
    }

    /// Apply proposals in order. A rejected edit is logged and skipped; the rest proceed.
    async fn apply(
        &self,
        pass: u32,
        mut edits: Vec<SkillEdit>,
        summary: &mut RunSummary,
    ) -> Result<Applied> {
        let limit = self.config.max_edits_per_pass;
        if edits.len() > limit {
            let dropped = edits.len() - limit;
            tracing::warn!(project = %self.key, pass, proposed = edits.len(), limit, "too many edits, dropping the rest");
            self.log(
                pass,
                RunOutcome::Truncated,
                None,
                Some(serde_json::json!({"proposed": edits.len(), "limit": limit})),
            )
            .await?;
            summary.truncated += dropped;
            edits.truncate(limit);
        }

        let mut rejections = Vec::new();
        for edit in edits {
            if !self.still_held().await? {
                return Ok(Applied { rejections, lost: true });
            }

            let artifact = format!("{}/{}", edit.skill, edit.file);
            let root = self.skills_root.clone();
            let written = tokio::task::spawn_blocking(move || {
                let name = ArtifactName::new(&edit.skill, &edit.file)?;
                skills::write_atomic(&root, &name, &edit.body)
            })
            .await
            .context("skill write task failed")?;

            match written {
                Ok(written) => {
                    tracing::info!(project = %self.key, artifact = %written.name, lines = written.line_count, "skill updated");
                    summary.applied += 1;
                    self.log(
                        pass,
                        RunOutcome::Applied,
                        Some(written.name),
                        Some(serde_json::json!({"lines": written.line_count})),
                    )
                    .await?;
                }
                Err(e) if e.is_rejection() => {
                    tracing::warn!(project = %self.key, artifact = %artifact, error = %e, "edit rejected");
                    summary.rejected += 1;
                    let lines = match &e {
                        SkillsError::RejectedTooLarge { lines, .. } => Some(*lines),
                        _ => None,
                    };
                    self.log(
                        pass,
                        RunOutcome::Rejected,
                        Some(artifact.clone()),
                        Some(serde_json::json!({"reason": e.to_string(), "lines": lines})),
                    )
                    .await?;
                    rejections.push(Rejection {
                        artifact,
                        reason: e.to_string(),
                        lines,
                    });
                }
                Err(e) => return Err(e).with_context(|| format!("failed to write {artifact}")),
            }
        }

        Ok(Applied { rejections, lost: false })
    }

    async fn still_held(&self) -> Result<bool> {
        let (key, token) = (self.key.clone(), self.token.clone());
        let pending = self
            .with_db(move |conn| lock::pending(conn, &key, &token))
            .await?;
        Ok(pending.is_some())
    }

    /// Linger for the idle grace period so a trigger that arrives right after a pass is
    /// picked up by this worker instead of spawning a new one. Returns early once a pass is
    /// pending or the lock is gone.
    async fn wait_idle_grace(&self, lost: &AtomicBool) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.idle_grace();
        loop {
            let (key, token) = (self.key.clone(), self.token.clone());
            let pending = self
                .with_db(move |conn| lock::pending(conn, &key, &token))
                .await?;
            if pending != Some(false) || lost.load(Ordering::SeqCst) {
                return Ok(());
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(self.config.heartbeat())).await;
        }
    }

    async fn log(
        &self,
        pass: u32,
        outcome: RunOutcome,
        artifact: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let key = self.key.clone();
        self.with_db(move |conn| {
            runlog::record(conn, &key, pass, outcome, artifact.as_deref(), details.as_ref(), Utc::now())
        })
        .await
    }

    fn spawn_heartbeat(&self, lost: Arc<AtomicBool>) -> JoinHandle<()> {
        let db = Arc::clone(&self.db);
        let (key, token) = (self.key.clone(), self.token.clone());
        let period = self.config.heartbeat();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately; adopt() already stamped the heartbeat
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (db, key, token) = (Arc::clone(&db), key.clone(), token.clone());
                let beat = tokio::task::spawn_blocking(move || {
                    let conn = db.lock().map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
                    Ok::<_, anyhow::Error>(lock::heartbeat(&conn, &key, &token, Utc::now())?)
                })
                .await;

                match beat {
                    Ok(Ok(true)) => tracing::trace!("heartbeat"),
                    Ok(Ok(false)) => {
                        lost.store(true, Ordering::SeqCst);
                        break;
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "heartbeat failed"),
                    Err(e) => {
                        tracing::warn!(error = %e, "heartbeat task failed");
                        break;
                    }
                }
            }
        })
    }

    /// Run a state operation on the shared connection off the async runtime.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            Ok::<T, anyhow::Error>(f(&mut conn)?)
        })
        .await
        .context("db task failed")?
    }
}
