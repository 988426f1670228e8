use thiserror::Error;

use crate::model::Step;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("cannot reach database at {uri}: {detail}")]
    Connectivity { uri: String, detail: String },

    #[error("no archive found for collection '{0}'")]
    ArchiveNotFound(String),

    #[error("{collection}: {step} write failed: {detail}")]
    WriteFailure {
        collection: String,
        step: Step,
        detail: String,
    },

    #[error("{collection}: index build failed: {detail}")]
    IndexBuildFailure { collection: String, detail: String },

    #[error("{collection}: corrupt archive at line {line}: {detail}")]
    CorruptArchive {
        collection: String,
        line: u64,
        detail: String,
    },

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled by operator")]
    Cancelled,

    #[error("rollback incomplete: {restored} of {total} collections restored")]
    RollbackIncomplete { restored: usize, total: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl MigrationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "connectivity_error",
            Self::ArchiveNotFound(_) => "archive_not_found",
            Self::WriteFailure { .. } => "write_failure",
            Self::IndexBuildFailure { .. } => "index_build_failure",
            Self::CorruptArchive { .. } => "corrupt_archive",
            Self::Locked(_) => "locked",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Cancelled => "cancelled",
            Self::RollbackIncomplete { .. } => "rollback_incomplete",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Db(_) => "db_error",
        }
    }

    /// Process exit status for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connectivity { .. } => 2,
            Self::WriteFailure { .. } | Self::CorruptArchive { .. } => 3,
            Self::ArchiveNotFound(_) | Self::RollbackIncomplete { .. } => 4,
            Self::Locked(_) => 5,
            Self::Cancelled => 6,
            Self::IndexBuildFailure { .. }
            | Self::InvalidConfig(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Db(_) => 1,
        }
    }

    /// Attach collection and step context to a low-level failure.
    ///
    /// Driver, IO and serialization errors become `WriteFailure`; errors that
    /// already carry their own context pass through unchanged.
    pub fn during(self, collection: &str, step: Step) -> Self {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Db(_) => Self::WriteFailure {
                collection: collection.to_string(),
                step,
                detail: self.to_string(),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
