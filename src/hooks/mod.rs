//! Hook Adapter: turns host lifecycle events into counter updates and triggers.
//!
//! Each event is handled in one `BEGIN IMMEDIATE` transaction: the counter mutation, the
//! threshold evaluation, the debounce stamp, the per-session reset and the coordinator
//! decision commit together. Only launching a worker happens after the commit, and the
//! launcher never waits for it, so the hook returns quickly.

pub mod events;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::error::Result;
use crate::overseer::launcher::WorkerLauncher;
use crate::state::counters::{self, Counters};
use crate::state::lock::{self, AcquireOutcome};
use crate::state::trigger::{self, EvaluationPoint, TriggerConfig};
use crate::state::project_key;

pub use events::{HookEvent, HookInput};

/// Why a handler fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FireReason {
    Threshold,
    FirstResponse,
    Flush,
}

/// What a handler did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookOutcome {
    /// Session counters after the event (zero if the event fired).
    pub counters: Counters,
    pub fired: Option<FireReason>,
    pub coordination: Option<AcquireOutcome>,
}

impl HookOutcome {
    fn quiet(counters: Counters) -> Self {
        Self {
            counters,
            fired: None,
            coordination: None,
        }
    }
}

pub struct HookAdapter<'a> {
    conn: &'a mut Connection,
    defaults: TriggerConfig,
    liveness: Duration,
    launcher: &'a dyn WorkerLauncher,
}

impl<'a> HookAdapter<'a> {
    pub fn new(
        conn: &'a mut Connection,
        defaults: TriggerConfig,
        liveness: Duration,
        launcher: &'a dyn WorkerLauncher,
    ) -> Self {
        Self {
            conn,
            defaults,
            liveness,
            launcher,
        }
    }

    /// Dispatch a decoded host event. Events the adapter does not act on return `None`.
    pub fn handle(&mut self, input: &HookInput, now: DateTime<Utc>) -> Result<Option<HookOutcome>> {
        let project = input.cwd.as_path();
        let session = input.session_id.as_str();
        let transcript = input.transcript_path.as_deref();

        let outcome = match input.hook_event_name {
            HookEvent::SessionStart => self.on_session_start(project, session, transcript, now)?,
            HookEvent::UserPromptSubmit => {
                self.on_user_prompt_submit(project, session, input.prompt_tokens(), now)?
            }
            HookEvent::Stop => self.on_stop(project, session, transcript, now)?,
            HookEvent::SessionEnd => self.on_session_end(project, session, now)?,
            HookEvent::Other => return Ok(None),
        };
        Ok(Some(outcome))
    }

    /// Initialize the session's counters. Never triggers.
    pub fn on_session_start(
        &mut self,
        project: &Path,
        session: &str,
        transcript: Option<&Path>,
        now: DateTime<Utc>,
    ) -> Result<HookOutcome> {
        let key = project_key(project);
        let transcript = transcript.map(|t| t.to_string_lossy().into_owned());
        counters::start_session(self.conn, &key, session, transcript.as_deref(), now)?;
        let current = counters::read_counters(self.conn, &key, session)?.unwrap_or_default();
        tracing::debug!(project = %key, session, "session started");
        Ok(HookOutcome::quiet(current))
    }

    pub fn on_user_prompt_submit(
        &mut self,
        project: &Path,
        session: &str,
        estimated_tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<HookOutcome> {
        let key = project_key(project);
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let config = trigger::effective_config(&tx, &key, &self.defaults)?;
        let current = counters::record_prompt(&tx, &key, session, estimated_tokens, now)?;
        let last = trigger::last_trigger(&tx, &key)?;

        let fired = trigger::should_trigger_at(EvaluationPoint::PromptSubmit, &current, &config, last, now)
            .then_some(FireReason::Threshold);

        let outcome = commit_event(tx, &key, session, current, fired, self.liveness, now)?;
        self.launch_if_spawned(project, &key, &outcome)?;
        Ok(outcome)
    }

    /// Turn boundary. Counts the response, meters transcript growth and evaluates again so
    /// a long single-prompt turn still triggers.
    pub fn on_stop(
        &mut self,
        project: &Path,
        session: &str,
        transcript: Option<&Path>,
        now: DateTime<Utc>,
    ) -> Result<HookOutcome> {
        let key = project_key(project);
        // Opaque: only the file's length is used
        let transcript_len = transcript.and_then(|path| match std::fs::metadata(path) {
            Ok(meta) => Some((path.to_string_lossy().into_owned(), meta.len())),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "transcript not readable");
                None
            }
        });

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let config = trigger::effective_config(&tx, &key, &self.defaults)?;
        let responses = counters::record_response(&tx, &key, session, now)?;
        let current = match &transcript_len {
            Some((path, len)) => {
                let growth = counters::advance_transcript(&tx, &key, session, path, *len, now)?;
                // Prompt text in the growth was already estimated at submit time
                counters::credit_transcript_tokens(&tx, &key, session, events::tokens_for_bytes(growth), now)?
            }
            None => counters::read_counters(&tx, &key, session)?.unwrap_or_default(),
        };
        let last = trigger::last_trigger(&tx, &key)?;

        let fired = if config.trigger_on_first_response
            && responses == 1
            && trigger::debounce_elapsed(config.debounce, last, now)
        {
            Some(FireReason::FirstResponse)
        } else if config.evaluate_on_stop
            && trigger::should_trigger_at(EvaluationPoint::Stop, &current, &config, last, now)
        {
            Some(FireReason::Threshold)
        } else {
            None
        };

        let outcome = commit_event(tx, &key, session, current, fired, self.liveness, now)?;
        self.launch_if_spawned(project, &key, &outcome)?;
        Ok(outcome)
    }

    /// Final evaluation, then archive the session.
    ///
    /// With `flush_on_end`, any activity not yet handed to an overseer fires regardless of
    /// threshold and debounce.
    pub fn on_session_end(
        &mut self,
        project: &Path,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<HookOutcome> {
        let key = project_key(project);
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let config = trigger::effective_config(&tx, &key, &self.defaults)?;
        let current = counters::read_counters(&tx, &key, session)?.unwrap_or_default();
        let fired = (config.flush_on_end && current != Counters::default())
            .then_some(FireReason::Flush);
        counters::end_session(&tx, &key, session, now)?;

        let outcome = commit_event(tx, &key, session, current, fired, self.liveness, now)?;
        self.launch_if_spawned(project, &key, &outcome)?;
        Ok(outcome)
    }

    /// Start a worker if this event was granted the lock.
    fn launch_if_spawned(&mut self, project: &Path, key: &str, outcome: &HookOutcome) -> Result<()> {
        if let Some(AcquireOutcome::Spawned { token, .. }) = &outcome.coordination {
            if let Err(e) = self.launcher.launch(project, token) {
                // Free the lock so the next trigger can try again
                tracing::warn!(project = key, error = %e, "failed to launch overseer");
                lock::release(self.conn, key, token)?;
            }
        }
        Ok(())
    }
}

/// Commit an event. A firing event stamps the debounce time, resets this session's counters
/// and asks the coordinator for a worker, all in the same transaction.
fn commit_event(
    tx: Transaction<'_>,
    key: &str,
    session: &str,
    current: Counters,
    fired: Option<FireReason>,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<HookOutcome> {
    let Some(reason) = fired else {
        tx.commit()?;
        return Ok(HookOutcome::quiet(current));
    };

    trigger::mark_triggered(&tx, key, now)?;
    counters::reset(&tx, key, session, now)?;
    let coordination = lock::acquire_or_notify_in(&tx, key, std::process::id(), liveness, now)?;
    tx.commit()?;

    tracing::info!(
        project = key,
        session,
        reason = ?reason,
        tokens = current.tokens,
        prompts = current.prompts,
        outcome = ?coordination,
        "trigger fired"
    );

    Ok(HookOutcome {
        counters: Counters::default(),
        fired: Some(reason),
        coordination: Some(coordination),
    })
}
