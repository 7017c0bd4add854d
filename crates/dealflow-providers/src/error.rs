//! Error types for provider clients.

/// The result type used throughout dealflow-providers.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The provider returned a non-success status.
    #[error("provider API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("provider transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The incremental sync cursor is no longer valid (HTTP 410).
    ///
    /// Callers fall back to a full sync window.
    #[error("sync token expired")]
    SyncTokenExpired,

    /// The call was aborted by a cancellation request.
    ///
    /// Not an error in the taxonomy sense; handlers short-circuit cleanly.
    #[error("cancelled")]
    Cancelled,

    /// A response body could not be decoded.
    #[error("provider response decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// The client is misconfigured.
    #[error("provider configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl Error {
    /// Creates a new API error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a new decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if the call was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_flagged() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::api(500, "boom").is_cancelled());
    }

    #[test]
    fn api_error_display() {
        let err = Error::api(410, "Gone");
        assert!(err.to_string().contains("410"));
    }
}
