/// Error classification for retry and display decisions
///
/// This module turns an opaque failure into a typed signal. Each failure is
/// classified into one of eight kinds which dictate whether it is retried
/// and what the user is told about it. Classification is total and pure.
use crate::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of failure, in the taxonomy shared by retries and fallback views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response was received (connection refused, DNS, offline)
    Network,

    /// The request was sent but did not complete in time (HTTP 408)
    Timeout,

    /// The request was rejected as malformed (HTTP 4xx)
    Validation,

    /// Missing or insufficient credentials (HTTP 401/403)
    Auth,

    /// The resource does not exist (HTTP 404)
    NotFound,

    /// Too many requests (HTTP 429)
    RateLimited,

    /// The server failed (HTTP 5xx)
    Server,

    /// Anything unmatched
    Unknown,
}

impl ErrorKind {
    /// Check if failures of this kind are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server | ErrorKind::RateLimited
        )
    }

    /// Message shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Unable to connect. Please check your internet connection.",
            ErrorKind::Timeout => "The request took too long to complete.",
            ErrorKind::Validation => "Some of the information provided is invalid.",
            ErrorKind::Auth => "You don't have permission to access this content.",
            ErrorKind::NotFound => "The requested content could not be found.",
            ErrorKind::RateLimited => "Too many requests. Please slow down.",
            ErrorKind::Server => "Something went wrong on our end.",
            ErrorKind::Unknown => "An unexpected error occurred.",
        }
    }

    /// Action suggested alongside the user message
    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Check your connection and try again.",
            ErrorKind::Timeout => "Try again in a moment.",
            ErrorKind::Validation => "Review your input and try again.",
            ErrorKind::Auth => "Sign in again or contact your instructor.",
            ErrorKind::NotFound => "Go back to the course overview.",
            ErrorKind::RateLimited => "Wait a few seconds before trying again.",
            ErrorKind::Server => "Try again later. We have been notified.",
            ErrorKind::Unknown => "Refresh the page. Contact support if it keeps happening.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "Network"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::Auth => write!(f, "Auth"),
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::RateLimited => write!(f, "RateLimited"),
            ErrorKind::Server => write!(f, "Server"),
            ErrorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Typed, actionable view of a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub user_message: String,
    pub suggested_action: String,
}

impl ErrorClassification {
    /// Build the classification for a kind from the static message table
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            user_message: kind.user_message().to_string(),
            suggested_action: kind.suggested_action().to_string(),
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} {}",
            self.kind,
            if self.retryable { "retryable" } else { "terminal" },
            self.user_message,
            self.suggested_action
        )
    }
}

/// Classify a raw failure
///
/// Typed variants map directly, HTTP errors map by status range, I/O errors
/// by their kind and untyped errors by their message.
pub fn classify(error: &AppError) -> ErrorClassification {
    ErrorClassification::from_kind(kind_of(error))
}

/// Classify an `anyhow::Error`, looking through it for a typed cause first
pub fn classify_anyhow(error: &anyhow::Error) -> ErrorClassification {
    let kind = if let Some(app) = error.downcast_ref::<AppError>() {
        kind_of(app)
    } else if let Some(io) = error.downcast_ref::<std::io::Error>() {
        kind_of_io(io)
    } else {
        kind_of_message(&format!("{:#}", error))
    };
    ErrorClassification::from_kind(kind)
}

fn kind_of(error: &AppError) -> ErrorKind {
    match error {
        AppError::Network(_) => ErrorKind::Network,
        AppError::Timeout(_) => ErrorKind::Timeout,
        AppError::Validation(_) => ErrorKind::Validation,
        AppError::Auth(_) => ErrorKind::Auth,
        AppError::NotFound(_) => ErrorKind::NotFound,
        AppError::RateLimited(_) => ErrorKind::RateLimited,
        AppError::Server(_) => ErrorKind::Server,
        AppError::Http { status, .. } => kind_of_status(*status),
        AppError::Io(io) => kind_of_io(io),
        AppError::Other(msg) => kind_of_message(msg),

        // Raised by the recovery layer itself, never retried
        AppError::RecoveryInProgress { .. }
        | AppError::NoSuchRecovery { .. }
        | AppError::RecoveryCancelled { .. }
        | AppError::InvalidPolicy(_) => ErrorKind::Unknown,
    }
}

/// Map an HTTP status to a kind. Status 0 means no response was received.
fn kind_of_status(status: u16) -> ErrorKind {
    match status {
        0 => ErrorKind::Network,
        500..=599 => ErrorKind::Server,
        429 => ErrorKind::RateLimited,
        408 => ErrorKind::Timeout,
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    }
}

fn kind_of_io(io_err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;

    match io_err.kind() {
        Io::TimedOut => ErrorKind::Timeout,

        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::AddrNotAvailable
        | Io::BrokenPipe
        | Io::UnexpectedEof
        | Io::Interrupted
        | Io::WouldBlock => ErrorKind::Network,

        Io::NotFound => ErrorKind::NotFound,
        Io::PermissionDenied => ErrorKind::Auth,
        Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,

        _ => ErrorKind::Unknown,
    }
}

fn kind_of_message(message: &str) -> ErrorKind {
    let msg = message.to_lowercase();

    if msg.contains("timeout") || msg.contains("timed out") {
        ErrorKind::Timeout
    } else if msg.contains("rate limit") || msg.contains("too many requests") {
        ErrorKind::RateLimited
    } else if msg.contains("network")
        || msg.contains("failed to fetch")
        || msg.contains("connection")
        || msg.contains("offline")
    {
        ErrorKind::Network
    } else if msg.contains("unauthorized") || msg.contains("forbidden") {
        ErrorKind::Auth
    } else if msg.contains("not found") {
        ErrorKind::NotFound
    } else {
        ErrorKind::Unknown
    }
}

/// Context attached to an error report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportContext {
    /// Operation or component name (e.g., "load-lessons", "error-boundary")
    pub operation: String,

    /// When the failure was observed
    pub timestamp: DateTime<Utc>,

    /// Additional metadata (recovery key, attempts, fault count, trace, ...)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ReportContext {
    /// Create a new report context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Context for a terminal recovery failure
    pub fn for_recovery(key: &str, attempts: u32, max_attempts: u32) -> Self {
        Self::new("recovery")
            .with_metadata("key", key)
            .with_metadata("attempts", attempts)
            .with_metadata("max_attempts", max_attempts)
    }

    /// Add metadata to the context
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
