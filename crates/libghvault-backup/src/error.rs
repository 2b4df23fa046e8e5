use libghvault_core::VaultError;
use thiserror::Error;

/// Errors raised by backup orchestration
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Core(#[from] VaultError),

    #[error("git error: {0}")]
    Git(git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<git2::Error> for BackupError {
    fn from(err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};
        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) | (_, ErrorClass::Ssh) => {
                BackupError::Core(VaultError::Auth(err.message().to_string()))
            }
            (_, ErrorClass::Net) | (_, ErrorClass::Http) => {
                BackupError::Core(VaultError::Network(err.message().to_string()))
            }
            _ => BackupError::Git(err),
        }
    }
}

impl BackupError {
    /// Whether the retry policy should attempt this operation again
    pub fn is_transient(&self) -> bool {
        match self {
            BackupError::Core(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            BackupError::Core(e) => e.error_code(),
            BackupError::Git(_) => "git_error",
            BackupError::Io(_) => "io_error",
            BackupError::Json(_) => "internal_error",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Core(e) => e.exit_code(),
            _ => 1,
        }
    }
}
