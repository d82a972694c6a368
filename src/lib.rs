// Allow complex types where needed for type-erased operations and callbacks
#![allow(clippy::type_complexity)]

pub mod config;
pub mod error;

// Re-export the caller-facing API for convenience
pub use config::{BoundarySettings, RecoverySettings, ReportingSettings, ResilienceConfig};
pub use error::{
    classify, classify_anyhow, run_with_backoff, run_with_backoff_cancellable, ErrorClassification,
    ErrorKind, ErrorReport, IsolationBoundary, MemorySink, RecoveryCoordinator, RecoveryState,
    ReportingSink, RetryPolicy, TracingSink,
};

use thiserror::Error;

/// Raw failures raised by operations guarded by the resilience layer.
///
/// Typed variants classify directly to their kind; `Http` is classified by
/// status range and `Other` by its message.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),

    #[error("Recovery already in progress for '{key}'")]
    RecoveryInProgress { key: String },

    #[error("No recovery registered for '{key}'")]
    NoSuchRecovery { key: String },

    #[error("Recovery cancelled for '{key}'")]
    RecoveryCancelled { key: String },

    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
}

// Manual Clone implementation because std::io::Error doesn't implement Clone
impl Clone for AppError {
    fn clone(&self) -> Self {
        match self {
            AppError::Network(s) => AppError::Network(s.clone()),
            AppError::Timeout(s) => AppError::Timeout(s.clone()),
            AppError::Validation(s) => AppError::Validation(s.clone()),
            AppError::Auth(s) => AppError::Auth(s.clone()),
            AppError::NotFound(s) => AppError::NotFound(s.clone()),
            AppError::RateLimited(s) => AppError::RateLimited(s.clone()),
            AppError::Server(s) => AppError::Server(s.clone()),
            AppError::Http { status, message } => AppError::Http {
                status: *status,
                message: message.clone(),
            },
            AppError::Io(e) => AppError::Io(std::io::Error::new(e.kind(), e.to_string())),
            AppError::Other(s) => AppError::Other(s.clone()),
            AppError::RecoveryInProgress { key } => AppError::RecoveryInProgress { key: key.clone() },
            AppError::NoSuchRecovery { key } => AppError::NoSuchRecovery { key: key.clone() },
            AppError::RecoveryCancelled { key } => AppError::RecoveryCancelled { key: key.clone() },
            AppError::InvalidPolicy(s) => AppError::InvalidPolicy(s.clone()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(err) => match err.downcast::<std::io::Error>() {
                Ok(io) => AppError::Io(io),
                Err(err) => AppError::Other(format!("{:#}", err)),
            },
        }
    }
}

impl AppError {
    /// Build an error from an HTTP response status
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        AppError::Http {
            status,
            message: message.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
