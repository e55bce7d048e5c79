//! Unified error types for the crypto core.

use core::fmt;

/// Opaque failure for every cryptographic operation.
///
/// Tag mismatches, truncated payloads, bad padding, wrong keys and malformed
/// input all surface as this one value with one message, so callers (and
/// attackers) cannot distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptographicFailure;

impl fmt::Display for CryptographicFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cryptographic operation failed")
    }
}

impl std::error::Error for CryptographicFailure {}

/// Misconfiguration: unknown algorithm id, wrong master-secret length,
/// malformed descriptor XML. These fail loudly at startup or first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigurationError {}

/// Normalize configuration errors on decrypt paths (oracle discipline).
impl From<ConfigurationError> for CryptographicFailure {
    fn from(_: ConfigurationError) -> Self {
        CryptographicFailure
    }
}
