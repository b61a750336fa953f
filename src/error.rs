//! Error handling for the sentinel pipeline
//!
//! Errors are grouped by how the caller should react:
//!
//! - `Transient` - hardware hiccup, the owning loop retries next cycle
//! - `Service` - external collaborator fault, this cycle is skipped
//! - `Rejected` - policy said no (cooldown active, empty patrol list)
//! - `Disabled` - subsystem gave up after a failed (re)initialization

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transient hardware fault (slow/failed capture, servo glitch)
    #[error("Transient fault in {operation}: {reason}")]
    Transient {
        operation: &'static str,
        reason: String,
    },

    /// External service fault (inference, notifier, actuator unreachable)
    #[error("Service fault in {operation}: {reason}")]
    Service {
        operation: &'static str,
        reason: String,
    },

    /// Policy rejection - not a failure, the caller asked at the wrong time
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Subsystem marked itself disabled; callers must treat this as a
    /// valid state, not assume availability
    #[error("Subsystem disabled: {0}")]
    Disabled(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient fault helper
    pub fn transient(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            reason: reason.into(),
        }
    }

    /// Service fault helper
    pub fn service(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Service {
            operation,
            reason: reason.into(),
        }
    }

    /// True for faults the owning loop should absorb and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient { .. } | Error::Service { .. } | Error::Http(_)
        )
    }

    /// True when the call was turned away by policy rather than failing
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        let e = Error::transient("capture", "device timeout");
        assert!(e.is_retryable());
        assert!(!e.is_rejection());
    }

    #[test]
    fn rejection_is_not_retryable() {
        let e = Error::Rejected("cooldown active".to_string());
        assert!(e.is_rejection());
        assert!(!e.is_retryable());
    }
}
