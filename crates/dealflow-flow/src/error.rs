//! Error types for the orchestration domain.

/// The result type used throughout dealflow-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] dealflow_store::Error),

    /// A provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] dealflow_providers::Error),

    /// A job envelope or payload could not be handled.
    ///
    /// Non-retryable: the worker answers 400 so the queue drops the job.
    #[error("invalid job: {message}")]
    InvalidJob {
        /// Description of what made the job invalid.
        message: String,
    },

    /// A queue dispatch failed.
    #[error("dispatch error: {message}")]
    Dispatch {
        /// Description of the dispatch failure.
        message: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The engine is misconfigured.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-job error.
    #[must_use]
    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    /// Creates a new dispatch error.
    #[must_use]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true when the underlying cause is a cancellation, which
    /// handlers treat as a clean short-circuit rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Provider(p) if p.is_cancelled())
    }

    /// Returns true for errors the queue should not retry.
    #[must_use]
    pub const fn is_non_retryable(&self) -> bool {
        matches!(self, Self::InvalidJob { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_provider_error_is_flagged() {
        let err = Error::Provider(dealflow_providers::Error::Cancelled);
        assert!(err.is_cancelled());

        let err = Error::dispatch("queue down");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn invalid_job_is_non_retryable() {
        assert!(Error::invalid_job("unknown jobType").is_non_retryable());
        assert!(!Error::dispatch("transient").is_non_retryable());
    }
}
