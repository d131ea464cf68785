//! Structured errors returned by remote endpoints.

use thiserror::Error;

/// Service error keys that signal throttling, timeouts or contention.
const TRANSIENT_ERROR_KEYS: &[&str] = &[
    "RequestThrottled",
    "RequestTimeout",
    "ServiceUnavailable",
    "WorkItemUpdateConflict",
    "DatabaseDeadlock",
];

/// Service error keys for requests that can never succeed as sent.
const PERMANENT_ERROR_KEYS: &[&str] = &[
    "RequestEntityTooLarge",
    "RequestNotGrantable",
    "InvalidPatchDocument",
    "WorkItemTypeNotFound",
    "Unauthorized",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after a backoff.
    Transient,
    /// Retrying cannot help, or would be unsafe.
    Permanent,
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Connection to {url} failed: {cause}")]
    ConnectionFailed { url: String, cause: String },

    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("{operation} HTTP {status}: {message}")]
    Http {
        operation: String,
        status: u16,
        error_key: Option<String>,
        message: String,
    },

    #[error("{operation} response decode error: {cause}")]
    Decode { operation: String, cause: String },

    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<RemoteError>,
    },

    #[error("{0}")]
    Internal(String),
}

impl RemoteError {
    /// Classifies the error for retry purposes. `None` means the error is not one we
    /// recognise; callers treat that as transient and log it.
    pub fn classify(&self) -> Option<ErrorClass> {
        match self {
            RemoteError::ConnectionFailed { .. } | RemoteError::Timeout { .. } => {
                Some(ErrorClass::Transient)
            }
            RemoteError::Http {
                status, error_key, ..
            } => {
                if let Some(key) = error_key.as_deref().map(normalize_key) {
                    if TRANSIENT_ERROR_KEYS.contains(&key) {
                        return Some(ErrorClass::Transient);
                    }
                    if PERMANENT_ERROR_KEYS.contains(&key) {
                        return Some(ErrorClass::Permanent);
                    }
                }
                match *status {
                    408 | 429 | 500 | 502 | 503 | 504 => Some(ErrorClass::Transient),
                    400 | 401 | 403 | 404 | 413 | 422 => Some(ErrorClass::Permanent),
                    _ => None,
                }
            }
            // A response we could not read may still have been applied upstream.
            RemoteError::Decode { .. } => Some(ErrorClass::Permanent),
            RemoteError::RetryExhausted { .. } => Some(ErrorClass::Permanent),
            RemoteError::Internal(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            RemoteError::RetryExhausted { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    pub fn decode(operation: &str, cause: impl ToString) -> Self {
        RemoteError::Decode {
            operation: operation.to_owned(),
            cause: cause.to_string(),
        }
    }
}

fn normalize_key(key: &str) -> &str {
    let key = key.strip_suffix("Exception").unwrap_or(key);
    key.strip_prefix("Vss").unwrap_or(key)
}
