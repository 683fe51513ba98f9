use thiserror::Error;
use upgrade_core::UpgradeError;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found on PATH")]
    BinaryNotFound(&'static str),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to decode reply to `{command}`: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected reply to `{command}`: {reason}")]
    Schema { command: String, reason: String },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
}

impl From<SshError> for UpgradeError {
    fn from(e: SshError) -> Self {
        UpgradeError::Device(e.to_string())
    }
}
