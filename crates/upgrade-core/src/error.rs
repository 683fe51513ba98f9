use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("cannot connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("image missing: {path}")]
    ImageMissing {
        path: String,
        /// Command the operator can run to fix the problem by hand.
        recipe: Option<String>,
    },

    #[error("configuration commit failed: {0}")]
    ConfigApply(String),

    #[error("configuration changes declined and rolled back")]
    ConfigDeclined,

    #[error("software add failed on {target} (package results: {codes:?})")]
    InstallFailure { target: String, codes: Vec<i32> },

    #[error("software versions differ between routing engines: re0={re0}, re1={re1}")]
    VersionMismatch { re0: String, re1: String },

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("unable to determine 32-bit or 64-bit image type")]
    ArchitectureUnknown,

    #[error("unable to locate the backup routing engine")]
    NoBackupRe,

    #[error("device has a single routing engine; {0} requires two")]
    NotRedundant(&'static str),

    #[error("image plan already resolved for this run")]
    PlanAlreadyResolved,

    #[error("device error: {0}")]
    Device(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("prompt input closed before an answer was given")]
    Prompt,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UpgradeError>;
