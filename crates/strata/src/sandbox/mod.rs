//! Code execution sandbox

pub mod frame;
pub mod persistent;
pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;

pub use frame::{OutputChunk, StreamDemuxer, StreamKind};
pub use persistent::PersistentSandbox;
pub use protocol::RenderedArtifact;

use crate::error::{Classify, ErrorCategory};

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to start sandbox: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sandbox process crashed: {0}")]
    Crashed(String),

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),
}

impl Classify for SandboxError {
    fn category(&self) -> ErrorCategory {
        match self {
            SandboxError::Unavailable(_) | SandboxError::Spawn(_) | SandboxError::Timeout(_) => {
                ErrorCategory::ResourceLimit
            }
            SandboxError::Crashed(_) | SandboxError::Protocol(_) => ErrorCategory::Unknown,
        }
    }
}

/// Result of running one code snippet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// Traceback when the code raised
    pub error: Option<String>,
    pub artifacts: Vec<RenderedArtifact>,
    pub elapsed: Duration,
    /// Produced by a one-off fallback process instead of the persistent one
    pub degraded: bool,
}

impl ExecutionOutput {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn images(&self) -> impl Iterator<Item = &RenderedArtifact> {
        self.artifacts
            .iter()
            .filter(|a| a.mime.starts_with("image/"))
    }
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn execute(&self, code: &str, timeout: Duration) -> Result<ExecutionOutput, SandboxError>;

    /// Release any long-lived resources
    async fn shutdown(&self) {}
}
