use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox is disabled")]
    Disabled,

    #[error("Sandbox write failed: {0}")]
    WriteFailed(String),

    #[error("Sandbox command failed: {0}")]
    CommandFailed(String),
}

/// One file written into a run's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub contents: String,
}

/// Result of a sandboxed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability to touch a run's workspace through an isolated subprocess.
///
/// The workspace for a run is owned exclusively by the worker claiming
/// the run; other workers must not touch it.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Write files into the run's workspace.
    async fn write_files(&self, run_id: Uuid, files: &[FileChange]) -> Result<(), SandboxError>;

    /// Execute a command inside the run's workspace.
    async fn run_command(
        &self,
        run_id: Uuid,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutcome, SandboxError>;
}
