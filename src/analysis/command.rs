//! Subprocess analyzer: JSON request on stdin, JSON response on stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AnalysisRequest, AnalysisResponse, Analyzer};
use crate::error::{Result, SkillsError};

pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        let input = serde_json::to_vec(request)
            .map_err(|e| SkillsError::AnalysisFailure(format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&request.project)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SkillsError::AnalysisFailure(format!("failed to start {}: {e}", self.program))
            })?;

        // Write the request while stdout and stderr are being drained
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(&input).await;
                // Dropping stdin closes the pipe so the child sees EOF
                drop(stdin);
                written
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SkillsError::AnalysisFailure(format!("analyzer did not finish: {e}")))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // Child does not read its input; its exit status decides
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(program = %self.program, "analyzer closed stdin early");
                }
                Ok(Err(e)) => {
                    return Err(SkillsError::AnalysisFailure(format!(
                        "failed to write request: {e}"
                    )))
                }
                Err(e) => {
                    return Err(SkillsError::AnalysisFailure(format!(
                        "request writer failed: {e}"
                    )))
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SkillsError::AnalysisFailure(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| SkillsError::AnalysisFailure(format!("malformed analyzer response: {e}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(project: &std::path::Path) -> AnalysisRequest {
        AnalysisRequest {
            project: project.to_string_lossy().into_owned(),
            transcript: None,
            sessions: Vec::new(),
            artifacts: Vec::new(),
            pass: 1,
            rejections: Vec::new(),
        }
    }

    fn sh(script: &str) -> CommandAnalyzer {
        CommandAnalyzer::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn reads_json_response() {
        let tmp = tempfile::TempDir::new().unwrap();
        let analyzer = sh(
            r#"cat > /dev/null; echo '{"edits":[{"skill":"a","body":"b"}],"summary":"ok"}'"#,
        );
        let response = analyzer.analyze(&request(tmp.path())).await.unwrap();
        assert_eq!(response.edits.len(), 1);
        assert_eq!(response.summary.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn request_is_sent_on_stdin() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Echo the pass number back as the summary
        let analyzer = sh(
            r#"pass=$(sed -n 's/.*"pass":\([0-9]*\).*/\1/p'); echo "{\"summary\":\"$pass\"}""#,
        );
        let mut req = request(tmp.path());
        req.pass = 7;
        let response = analyzer.analyze(&req).await.unwrap();
        assert_eq!(response.summary.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn large_request_does_not_stall_a_chatty_child() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Writes a lot of output before it reads any input
        let analyzer = sh(
            r#"head -c 1048576 /dev/zero | tr '\0' ' '; cat > /dev/null; echo '{"summary":"done"}'"#,
        );
        let mut req = request(tmp.path());
        req.transcript = Some("x".repeat(4 * 1024 * 1024));

        let response = tokio::time::timeout(std::time::Duration::from_secs(30), analyzer.analyze(&req))
            .await
            .expect("analyzer stalled")
            .unwrap();
        assert_eq!(response.summary.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = sh("echo boom >&2; exit 3").analyze(&request(tmp.path())).await.unwrap_err();
        match err {
            SkillsError::AnalysisFailure(msg) => assert!(msg.contains("boom"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn garbage_output_is_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = sh("echo not json").analyze(&request(tmp.path())).await.unwrap_err();
        assert!(matches!(err, SkillsError::AnalysisFailure(_)));
    }

    #[tokio::test]
    async fn missing_program_is_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let analyzer = CommandAnalyzer::new("/definitely/not/a/program", Vec::new());
        assert!(analyzer.analyze(&request(tmp.path())).await.is_err());
    }
}
