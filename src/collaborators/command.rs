//! External-program collaborator.
//!
//! The configured program is spawned once per request. It receives a JSON
//! object on stdin with a `role` field (`draft`, `safety` or `quality`) and
//! must print a JSON reply on stdout. The reply may be wrapped in a Markdown
//! code fence or surrounded by other text; the first JSON object wins.
//!
//! | role | request fields | reply |
//! |------|----------------|-------|
//! | draft | `intent`, `iteration`, `previous_draft`, `revision_instructions`, `human_edit` | `{"draft": "..."}` |
//! | safety | `draft` | `{"score": n, "flags": [...], "recommendations": [...]}` |
//! | quality | `intent`, `draft` | `{"score": n, "strengths": [...], "improvements": [...]}` |

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{
    DraftAuthor, DraftRequest, QualityAssessment, QualityAssessor, SafetyAssessment,
    SafetyAssessor,
};
use crate::errors::CollaboratorError;
use crate::util::{extract_json_object, preview};

/// Runs `sh -c <command>` for every collaborator call.
#[derive(Debug, Clone)]
pub struct CommandCollaborator {
    command: String,
}

#[derive(Debug, Deserialize)]
struct DraftReply {
    draft: String,
}

impl CommandCollaborator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Spawn the program, feed it `request`, and return its stdout.
    ///
    /// Timeouts are enforced by the engine around the whole step; the child
    /// is killed when the future is dropped.
    async fn invoke(&self, request: serde_json::Value) -> Result<String, CollaboratorError> {
        let payload = serde_json::to_string(&request)
            .map_err(|e| CollaboratorError::Malformed(format!("Failed to encode request: {}", e)))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            CollaboratorError::Unavailable(format!(
                "Failed to spawn collaborator '{}': {}",
                self.command, e
            ))
        })?;

        // Feed stdin while stdout is drained so a chatty child cannot fill its
        // output pipe and stall waiting for us.
        let stdin = child.stdin.take();
        let write_input = async move {
            match stdin {
                Some(mut stdin) => match stdin.write_all(payload.as_bytes()).await {
                    // The child may answer without reading all of its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                },
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write_input, child.wait_with_output());
        let output = output.map_err(|e| {
            CollaboratorError::Unavailable(format!("Failed to wait for collaborator: {}", e))
        })?;
        written.map_err(|e| {
            CollaboratorError::Unavailable(format!("Failed to write collaborator stdin: {}", e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Unavailable(format!(
                "Collaborator exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                preview(stderr.trim(), 200)
            )));
        }

        debug!(command = %self.command, bytes = stdout.len(), "collaborator replied");
        Ok(stdout)
    }

    fn parse_reply<T: DeserializeOwned>(stdout: &str) -> Result<T, CollaboratorError> {
        let json = extract_json_object(stdout).ok_or_else(|| {
            CollaboratorError::Malformed(format!(
                "No JSON object in collaborator reply: {}",
                preview(stdout.trim(), 200)
            ))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| CollaboratorError::Malformed(format!("Unexpected reply shape: {}", e)))
    }
}

#[async_trait]
impl DraftAuthor for CommandCollaborator {
    async fn draft(&self, request: &DraftRequest) -> Result<String, CollaboratorError> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| CollaboratorError::Malformed(format!("Failed to encode request: {}", e)))?;
        body["role"] = json!("draft");
        let stdout = self.invoke(body).await?;
        let reply: DraftReply = Self::parse_reply(&stdout)?;
        Ok(reply.draft)
    }
}

#[async_trait]
impl SafetyAssessor for CommandCollaborator {
    async fn assess_safety(&self, draft: &str) -> Result<SafetyAssessment, CollaboratorError> {
        let stdout = self.invoke(json!({ "role": "safety", "draft": draft })).await?;
        Self::parse_reply(&stdout)
    }
}

#[async_trait]
impl QualityAssessor for CommandCollaborator {
    async fn assess_quality(
        &self,
        intent: &str,
        draft: &str,
    ) -> Result<QualityAssessment, CollaboratorError> {
        let stdout = self
            .invoke(json!({ "role": "quality", "intent": intent, "draft": draft }))
            .await?;
        Self::parse_reply(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn create_test_script(dir: &Path, name: &str, content: &str) -> PathBuf {
        let script_path = dir.join(name);
        std::fs::write(&script_path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms).unwrap();
        }
        script_path
    }

    fn collaborator(script: &Path) -> CommandCollaborator {
        CommandCollaborator::new(script.to_string_lossy().to_string())
    }

    #[tokio::test]
    async fn test_draft_reply_parsed() {
        let dir = tempdir().unwrap();
        let script = create_test_script(
            dir.path(),
            "author.sh",
            "#!/bin/sh\ncat > /dev/null\necho '{\"draft\": \"# Exercise\"}'\n",
        );
        let request = DraftRequest {
            intent: "grounding".into(),
            iteration: 1,
            previous_draft: None,
            revision_instructions: String::new(),
            human_edit: None,
        };
        let draft = collaborator(&script).draft(&request).await.unwrap();
        assert_eq!(draft, "# Exercise");
    }

    #[tokio::test]
    async fn test_request_carries_role() {
        let dir = tempdir().unwrap();
        let captured = dir.path().join("request.json");
        let script = create_test_script(
            dir.path(),
            "safety.sh",
            &format!(
                "#!/bin/sh\ncat > {}\necho '{{\"score\": 91, \"flags\": []}}'\n",
                captured.display()
            ),
        );
        let result = collaborator(&script).assess_safety("text").await.unwrap();
        assert_eq!(result.score, 91);

        let request: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&captured).unwrap()).unwrap();
        assert_eq!(request["role"], "safety");
        assert_eq!(request["draft"], "text");
    }

    #[tokio::test]
    async fn test_fenced_reply_tolerated() {
        let dir = tempdir().unwrap();
        let script = create_test_script(
            dir.path(),
            "quality.sh",
            "#!/bin/sh\ncat > /dev/null\nprintf 'Here you go:\\n```json\\n{\"score\": 72, \"improvements\": [\"warmer\"]}\\n```\\n'\n",
        );
        let result = collaborator(&script)
            .assess_quality("intent", "draft")
            .await
            .unwrap();
        assert_eq!(result.score, 72);
        assert_eq!(result.improvements, vec!["warmer".to_string()]);
    }

    #[tokio::test]
    async fn test_reply_with_brace_in_text() {
        let dir = tempdir().unwrap();
        let script = create_test_script(
            dir.path(),
            "author.sh",
            "#!/bin/sh\ncat > /dev/null\necho '{\"draft\": \"Rate it :} then ``` continue\"}'\n",
        );
        let request = DraftRequest {
            intent: "grounding".into(),
            iteration: 1,
            previous_draft: None,
            revision_instructions: String::new(),
            human_edit: None,
        };
        let draft = collaborator(&script).draft(&request).await.unwrap();
        assert_eq!(draft, "Rate it :} then ``` continue");
    }

    #[tokio::test]
    async fn test_large_output_before_reading_input() {
        let dir = tempdir().unwrap();
        // Fills the stdout pipe before touching stdin.
        let script = create_test_script(
            dir.path(),
            "chatty.sh",
            "#!/bin/sh\nyes ' ' | head -c 262144\ncat > /dev/null\necho '{\"score\": 88}'\n",
        );
        let draft = "x".repeat(262_144);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(20),
            collaborator(&script).assess_safety(&draft),
        )
        .await
        .expect("collaborator deadlocked")
        .unwrap();
        assert_eq!(result.score, 88);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_unavailable() {
        let dir = tempdir().unwrap();
        let script = create_test_script(
            dir.path(),
            "fail.sh",
            "#!/bin/sh\ncat > /dev/null\necho 'model offline' >&2\nexit 3\n",
        );
        let err = collaborator(&script).assess_safety("text").await.unwrap_err();
        match err {
            CollaboratorError::Unavailable(msg) => {
                assert!(msg.contains("code 3"));
                assert!(msg.contains("model offline"));
            }
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_reply_is_malformed() {
        let dir = tempdir().unwrap();
        let script = create_test_script(
            dir.path(),
            "garbage.sh",
            "#!/bin/sh\ncat > /dev/null\necho 'I cannot help with that'\n",
        );
        let err = collaborator(&script).assess_safety("text").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_malformed() {
        let dir = tempdir().unwrap();
        let script = create_test_script(
            dir.path(),
            "shape.sh",
            "#!/bin/sh\ncat > /dev/null\necho '{\"text\": \"no draft key\"}'\n",
        );
        let request = DraftRequest {
            intent: "x".into(),
            iteration: 1,
            previous_draft: None,
            revision_instructions: String::new(),
            human_edit: None,
        };
        let err = collaborator(&script).draft(&request).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }
}
