//! Subprocess sandbox.
//!
//! Writes files and runs commands through an isolated child process in
//! a per-run workspace directory. The workspace of a run belongs to the
//! worker claiming it; nothing here coordinates across workers.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::config::SandboxConfig;
use crate::domain::ports::sandbox::{CommandOutcome, FileChange, Sandbox, SandboxError};

pub struct SubprocessSandbox {
    config: SandboxConfig,
}

impl SubprocessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn workspace(&self, run_id: Uuid) -> PathBuf {
        Path::new(&self.config.workspace_root).join(run_id.to_string())
    }

    fn ensure_enabled(&self) -> Result<(), SandboxError> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(SandboxError::Disabled)
        }
    }

    /// Reject paths that would escape the workspace.
    fn resolve(&self, workspace: &Path, rel: &str) -> Result<PathBuf, SandboxError> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute()
            || rel_path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(SandboxError::WriteFailed(format!(
                "path escapes the workspace: {rel}"
            )));
        }
        Ok(workspace.join(rel_path))
    }
}

#[async_trait]
impl Sandbox for SubprocessSandbox {
    async fn write_files(&self, run_id: Uuid, files: &[FileChange]) -> Result<(), SandboxError> {
        self.ensure_enabled()?;
        let workspace = self.workspace(run_id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| SandboxError::WriteFailed(e.to_string()))?;

        for file in files {
            let target = self.resolve(&workspace, &file.path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SandboxError::WriteFailed(e.to_string()))?;
            }

            // The write goes through a child process rather than this
            // process's own file handles, so an execution-provider swap
            // (container, microVM) keeps the same shape.
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(format!("cat > '{}'", shell_escape(&target)))
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| SandboxError::WriteFailed(e.to_string()))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(file.contents.as_bytes())
                    .await
                    .map_err(|e| SandboxError::WriteFailed(e.to_string()))?;
            }

            let status = child
                .wait()
                .await
                .map_err(|e| SandboxError::WriteFailed(e.to_string()))?;
            if !status.success() {
                return Err(SandboxError::WriteFailed(format!(
                    "writer subprocess exited with {status} for {}",
                    file.path
                )));
            }
            debug!(run_id = %run_id, path = %file.path, "file written");
        }

        Ok(())
    }

    async fn run_command(
        &self,
        run_id: Uuid,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutcome, SandboxError> {
        self.ensure_enabled()?;
        let workspace = self.workspace(run_id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| SandboxError::CommandFailed(e.to_string()))?;

        let output = Command::new(program)
            .args(args)
            .current_dir(&workspace)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SandboxError::CommandFailed(e.to_string()))?;

        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn shell_escape(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
