use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Database used before load")]
    NotLoaded,

    #[error("Invalid backup settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("Unsupported configuration: {reason}")]
    Unsupported { reason: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Document store error: {reason}")]
    Store { reason: String },

    #[error("Backup task failed: {reason}")]
    Task { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BackupError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn invalid_settings(reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
