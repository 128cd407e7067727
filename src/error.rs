use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("ValidationRejected: {0}")]
    ValidationRejected(String),

    #[error("SandboxTimeoutError: execution exceeded {}s deadline", .limit.as_secs_f64())]
    Timeout { limit: Duration },

    #[error("SandboxMemoryError: {detail} (limit {limit} bytes)")]
    MemoryExceeded { limit: usize, detail: String },

    #[error("SandboxExecutionError: {message}")]
    Execution { message: String, trace: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("ToolNotFound: {0}")]
    ToolNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SandboxError {
    /// Detail written to `stderr` when the fault is folded into a failed result.
    pub fn diagnostic(&self) -> String {
        match self {
            SandboxError::Execution { trace, .. } if !trace.is_empty() => {
                format!("{}\n{}", self, trace)
            }
            _ => self.to_string(),
        }
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;
