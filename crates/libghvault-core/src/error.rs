use thiserror::Error;

/// Main error type for ghvault operations
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid arguments: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backup already in progress (pid {pid}, lease expires in {expires_in_ms}ms)")]
    InProgress { pid: u32, expires_in_ms: u64 },

    #[error("process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Get the error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            VaultError::Validation(_) => "invalid_args",
            VaultError::Auth(_) => "auth_failed",
            VaultError::Network(_) => "network_error",
            VaultError::Timeout(_) => "timeout",
            VaultError::Transaction(_) => "transaction_failed",
            VaultError::NotFound(_) => "not_found",
            VaultError::InProgress { .. } => "in_progress",
            VaultError::Process(_) => "process_error",
            VaultError::Io(_) => "io_error",
            VaultError::Json(_) => "internal_error",
            VaultError::TomlParse(_) => "invalid_args",
            VaultError::Internal(_) => "internal_error",
        }
    }

    /// Get the exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            VaultError::Validation(_) => 2,
            VaultError::TomlParse(_) => 2,
            VaultError::NotFound(_) => 3,
            VaultError::InProgress { .. } => 4,
            VaultError::Auth(_) => 5,
            VaultError::Network(_) | VaultError::Timeout(_) => 6,
            VaultError::Transaction(_) => 7,
            _ => 1,
        }
    }

    /// Whether the failure is worth retrying under the retry policy.
    ///
    /// Only network-category failures qualify; authentication and client
    /// errors are permanent for the current run.
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::Network(_) | VaultError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VaultError::Network("reset".into()).is_transient());
        assert!(VaultError::Timeout("fetch".into()).is_transient());
        assert!(!VaultError::Auth("bad key".into()).is_transient());
        assert!(!VaultError::Validation("bad repo".into()).is_transient());
        assert!(!VaultError::NotFound("repo".into()).is_transient());
    }

    #[test]
    fn test_exit_codes_distinct_for_lock_conflicts() {
        let in_progress = VaultError::InProgress { pid: 42, expires_in_ms: 1000 };
        let failed = VaultError::Network("down".into());
        assert_ne!(in_progress.exit_code(), failed.exit_code());
    }
}
