use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("No active code for this address")]
    OtpNotFound,

    #[error("Code expired")]
    OtpExpired,

    #[error("Too many failed attempts")]
    OtpAttemptsExceeded,

    #[error("Incorrect code")]
    OtpMismatch,

    #[error("Invalid reset token")]
    TokenInvalid,

    #[error("Reset token expired")]
    TokenExpired,

    #[error("Reset token already used")]
    TokenAlreadyUsed,

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("User store error: {0}")]
    UserStoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}
