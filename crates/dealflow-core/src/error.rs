//! Error types and result aliases shared across dealflow components.

/// The result type used throughout dealflow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core dealflow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested resource was not found.
    #[error("not found: {resource_type} with id {id}")]
    ResourceNotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A secret could not be resolved.
    #[error("secret error: {message}")]
    Secret {
        /// Description of the secret resolution failure.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new resource not found error.
    #[must_use]
    pub fn resource_not_found(resource_type: &'static str, id: impl std::fmt::Display) -> Self {
        Self::ResourceNotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new secret resolution error.
    #[must_use]
    pub fn secret(message: impl Into<String>) -> Self {
        Self::Secret {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_not_found_display() {
        let err = Error::resource_not_found("deal", "01J0000000000000000000000");
        assert!(err.to_string().contains("deal"));
        assert!(err.to_string().contains("01J"));
    }

    #[test]
    fn secret_error_display() {
        let err = Error::secret("TASKS_WEBHOOK_SECRET missing");
        assert!(err.to_string().starts_with("secret error"));
    }
}
