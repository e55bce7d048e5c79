//! Error types for key management and protection.

use std::fmt;

use warden_crypto::{ConfigurationError, CryptographicFailure};

/// Repository I/O failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    message: String,
}

impl RepositoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository error: {}", self.message)
    }
}

impl std::error::Error for RepositoryError {}

// ---------------------------------------------------------------------------
// Top-level protection error
// ---------------------------------------------------------------------------

/// Everything that can go wrong between a protector call and the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionError {
    /// Bad algorithm id, malformed XML, wrong master-secret size. Loud.
    Configuration(ConfigurationError),
    /// Repository I/O. Absorbed by the provider's serve-stale path unless no
    /// snapshot exists yet.
    Repository(RepositoryError),
    /// The single opaque cryptographic failure. Uniform by design.
    Crypto(CryptographicFailure),
    /// Programmer error: empty purpose, empty purpose chain.
    InvalidArgument(&'static str),
}

impl fmt::Display for ProtectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => e.fmt(f),
            Self::Repository(e) => e.fmt(f),
            Self::Crypto(e) => e.fmt(f),
            Self::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
        }
    }
}

impl std::error::Error for ProtectionError {}

impl From<ConfigurationError> for ProtectionError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

impl From<RepositoryError> for ProtectionError {
    fn from(e: RepositoryError) -> Self {
        Self::Repository(e)
    }
}

impl From<CryptographicFailure> for ProtectionError {
    fn from(e: CryptographicFailure) -> Self {
        Self::Crypto(e)
    }
}

impl ProtectionError {
    /// True for the opaque cryptographic kind.
    pub fn is_cryptographic(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_render_uniformly() {
        let a = ProtectionError::from(CryptographicFailure);
        let b = ProtectionError::Crypto(CryptographicFailure);
        assert_eq!(a, b);
        assert_eq!(format!("{}", a), "cryptographic operation failed");
        assert!(a.is_cryptographic());
    }

    #[test]
    fn display_carries_kind_context() {
        let e = ProtectionError::from(RepositoryError::new("disk on fire"));
        assert_eq!(format!("{}", e), "repository error: disk on fire");
        let e = ProtectionError::InvalidArgument("purpose must not be empty");
        assert_eq!(format!("{}", e), "invalid argument: purpose must not be empty");
    }
}
