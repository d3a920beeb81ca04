//! CLI `daemon` commands: start or notify a project's overseer, and the detached worker
//! entry point.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex};

use skills::analysis::{self, Analyzer};
use skills::config::SkillsConfig;
use skills::db;
use skills::overseer::launcher::{ProcessLauncher, WorkerLauncher};
use skills::overseer::Overseer;
use skills::state::lock::{self, AcquireOutcome};
use skills::state::project_key;

/// Start an overseer unless one is already running. Never notifies.
pub fn start(config: &SkillsConfig, project: &Path) -> Result<()> {
    let mut conn = db::open_database(config.resolved_db_path())?;
    let key = project_key(project);
    let outcome = lock::start_if_absent(
        &mut conn,
        &key,
        std::process::id(),
        config.overseer.liveness_timeout(),
        Utc::now(),
    )?;
    launch_if_spawned(&conn, project, &key, &outcome)?;
    print_outcome(project, &outcome);
    Ok(())
}

/// Start an overseer, or ask the running one for another pass.
pub fn notify(config: &SkillsConfig, project: &Path) -> Result<()> {
    let mut conn = db::open_database(config.resolved_db_path())?;
    let key = project_key(project);
    let outcome = lock::acquire_or_notify(
        &mut conn,
        &key,
        std::process::id(),
        config.overseer.liveness_timeout(),
        Utc::now(),
    )?;
    launch_if_spawned(&conn, project, &key, &outcome)?;
    print_outcome(project, &outcome);
    Ok(())
}

fn launch_if_spawned(
    conn: &rusqlite::Connection,
    project: &Path,
    key: &str,
    outcome: &AcquireOutcome,
) -> Result<()> {
    let Some(token) = outcome.spawned_token() else {
        return Ok(());
    };
    let launched = ProcessLauncher::current().and_then(|launcher| launcher.launch(project, token));
    if let Err(e) = launched {
        lock::release(conn, key, token)?;
        return Err(e);
    }
    Ok(())
}

fn print_outcome(project: &Path, outcome: &AcquireOutcome) {
    match outcome {
        AcquireOutcome::Spawned {
            reclaimed_from: Some(pid),
            ..
        } => println!(
            "Started overseer for {} (reclaimed abandoned lock from pid {pid})",
            project.display()
        ),
        AcquireOutcome::Spawned { .. } => println!("Started overseer for {}", project.display()),
        AcquireOutcome::Notified {
            holder_pid,
            already_pending: false,
        } => println!("Overseer running (pid {holder_pid}); re-evaluation requested"),
        AcquireOutcome::Notified { holder_pid, .. } => {
            println!("Overseer running (pid {holder_pid}); re-evaluation already pending")
        }
        AcquireOutcome::AlreadyRunning { holder_pid } => {
            println!("Overseer already running (pid {holder_pid})")
        }
    }
}

/// Detached worker entry point, launched by whoever won the lock.
pub async fn run(config: &SkillsConfig, project: &Path, token: &str) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let db = Arc::new(Mutex::new(conn));

    let analyzer: Arc<dyn Analyzer> = match analysis::create_analyzer(&config.analyzer) {
        Ok(analyzer) => Arc::from(analyzer),
        Err(e) => {
            tracing::error!(error = %e, "cannot create analyzer, releasing lock");
            let conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            lock::release(&conn, &project_key(project), token)?;
            return Err(e);
        }
    };

    let overseer = Overseer::new(
        db,
        analyzer,
        project,
        token,
        config.overseer.clone(),
        config.skills_root(project),
    );

    tokio::select! {
        result = overseer.run() => {
            let summary = result.context("overseer failed")?;
            tracing::info!(
                passes = summary.passes,
                applied = summary.applied,
                rejected = summary.rejected,
                truncated = summary.truncated,
                exit = ?summary.exit,
                "overseer exited"
            );
        }
        () = shutdown_signal() => {
            tracing::info!("shutdown requested, releasing overseer lock");
            overseer.release().await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
