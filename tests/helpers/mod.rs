#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use tempfile::TempDir;

use skills::analysis::{AnalysisRequest, AnalysisResponse, Analyzer, SkillEdit};
use skills::config::OverseerConfig;
use skills::db;
use skills::error::{Result, SkillsError};
use skills::overseer::launcher::WorkerLauncher;
use skills::state::trigger::{TriggerConfig, TriggerMode};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// A temporary project directory plus an on-disk state database outside it.
pub struct TestEnv {
    pub dir: TempDir,
    pub project: PathBuf,
    pub db_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let db_path = dir.path().join("state").join("state.db");
        Self {
            dir,
            project,
            db_path,
        }
    }

    /// A new connection to the shared database, as a separate process would open it.
    pub fn open(&self) -> Connection {
        db::open_database(&self.db_path).unwrap()
    }

    pub fn key(&self) -> String {
        skills::state::project_key(&self.project)
    }

    pub fn skills_root(&self) -> PathBuf {
        self.project.join(".claude").join("skills")
    }
}

pub fn prompts_config(threshold: u64, debounce_secs: u64) -> TriggerConfig {
    TriggerConfig::new(
        TriggerMode::Prompts,
        threshold,
        Duration::from_secs(debounce_secs),
    )
    .unwrap()
}

/// Fast worker timings for tests.
pub fn overseer_config() -> OverseerConfig {
    OverseerConfig {
        heartbeat_secs: 1,
        liveness_timeout_secs: 30,
        idle_grace_secs: 0,
        analysis_timeout_secs: 5,
        max_edits_per_pass: 16,
        condense_on_reject: false,
        session_retention_secs: 3_600,
        run_log_keep: 100,
    }
}

/// A valid `SKILL.md` with `body_lines` lines after the header (4 header lines).
pub fn skill_body(name: &str, body_lines: usize) -> String {
    let mut body = format!("---\nname: {name}\ndescription: notes about {name}\n---\n");
    for i in 0..body_lines {
        body.push_str(&format!("- point {i}\n"));
    }
    body
}

pub fn edit(skill: &str, body: &str) -> SkillEdit {
    SkillEdit {
        skill: skill.to_string(),
        file: "SKILL.md".to_string(),
        body: body.to_string(),
    }
}

/// Records launches instead of spawning processes.
#[derive(Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingLauncher {
    pub fn tokens(&self) -> Vec<String> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, token)| token.clone())
            .collect()
    }
}

impl WorkerLauncher for RecordingLauncher {
    fn launch(&self, project: &Path, token: &str) -> anyhow::Result<()> {
        self.launches
            .lock()
            .unwrap()
            .push((project.to_path_buf(), token.to_string()));
        Ok(())
    }
}

pub enum Step {
    Respond(Vec<SkillEdit>),
    Fail(&'static str),
    /// Never answers.
    Hang,
}

type CallHook = Box<dyn Fn(usize, &AnalysisRequest) + Send + Sync>;

/// Plays back a fixed list of answers and records every request. Once the script runs
/// out it answers with no edits.
pub struct ScriptedAnalyzer {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<AnalysisRequest>>,
    on_call: Option<CallHook>,
}

impl ScriptedAnalyzer {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            on_call: None,
        }
    }

    /// Run `hook(call_index, request)` inside every call, before answering.
    pub fn on_call(mut self, hook: impl Fn(usize, &AnalysisRequest) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        if let Some(hook) = &self.on_call {
            hook(call, request);
        }

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(edits)) => Ok(AnalysisResponse {
                edits,
                summary: Some(format!("call {call}")),
            }),
            Some(Step::Fail(msg)) => Err(SkillsError::AnalysisFailure(msg.to_string())),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(AnalysisResponse::default())
            }
            None => Ok(AnalysisResponse::default()),
        }
    }
}
