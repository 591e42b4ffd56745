//! Terminal outcomes of a generate call

/// Why a generate call produced no result.
///
/// Credential-class upstream failures never appear here on their own; they
/// are absorbed by rotation and only surface as `CredentialsExhausted`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("no API keys configured")]
    NoCredentialsConfigured,

    #[error("no active API key selected")]
    NoActiveCredential,

    #[error("all API keys failed after {attempts} attempts; check or replace your keys")]
    CredentialsExhausted { attempts: usize },

    #[error("request cancelled by user")]
    Cancelled,

    /// Upstream message, verbatim.
    #[error("{0}")]
    Upstream(String),
}

impl GenerateError {
    /// Kind label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerateError::NoCredentialsConfigured => "no_credentials_configured",
            GenerateError::NoActiveCredential => "no_active_credential",
            GenerateError::CredentialsExhausted { .. } => "credentials_exhausted",
            GenerateError::Cancelled => "cancelled",
            GenerateError::Upstream(_) => "upstream",
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, GenerateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_is_passed_through() {
        let err = GenerateError::Upstream("[500] Internal error encountered. (INTERNAL)".into());
        assert_eq!(err.to_string(), "[500] Internal error encountered. (INTERNAL)");
        assert_eq!(err.kind(), "upstream");
    }

    #[test]
    fn exhausted_reports_attempts() {
        let err = GenerateError::CredentialsExhausted { attempts: 3 };
        assert!(err.to_string().contains("3 attempts"), "got: {err}");
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            GenerateError::NoCredentialsConfigured.kind(),
            GenerateError::NoActiveCredential.kind(),
            GenerateError::CredentialsExhausted { attempts: 1 }.kind(),
            GenerateError::Cancelled.kind(),
            GenerateError::Upstream(String::new()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
