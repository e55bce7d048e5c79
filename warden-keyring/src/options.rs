//! Key-management configuration.

use chrono::Duration;
use warden_crypto::{ConfigurationError, EncryptionAlgorithm, ValidationAlgorithm};

/// Tunable lifetimes and the algorithm pair for newly created keys.
#[derive(Clone, Debug)]
pub struct KeyManagementOptions {
    /// How far in the future a freshly created key activates, leaving time
    /// for the new key element to propagate to every consumer of the
    /// repository before payloads reference it.
    pub new_key_activation_delay: Duration,
    /// Lifetime of a key from activation to expiration.
    pub key_lifetime: Duration,
    /// Window before a default key's expiration in which a successor must
    /// already be staged; otherwise the provider creates one.
    pub key_propagation_window: Duration,
    /// How long a key-ring snapshot is served before a refresh.
    pub ring_refresh_period: Duration,
    /// How long a stale snapshot is served after a failed rebuild before
    /// the next rebuild is attempted.
    pub ring_refresh_backoff: Duration,
    /// Encryption algorithm for new keys.
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Validation algorithm for new keys (ignored for GCM).
    pub validation_algorithm: ValidationAlgorithm,
}

impl KeyManagementOptions {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.key_lifetime <= Duration::zero() {
            return Err(ConfigurationError::new("key_lifetime must be positive"));
        }
        if self.new_key_activation_delay < Duration::zero() {
            return Err(ConfigurationError::new(
                "new_key_activation_delay must not be negative",
            ));
        }
        if self.key_propagation_window < Duration::zero() {
            return Err(ConfigurationError::new(
                "key_propagation_window must not be negative",
            ));
        }
        if self.ring_refresh_period <= Duration::zero() {
            return Err(ConfigurationError::new("ring_refresh_period must be positive"));
        }
        Ok(())
    }
}

impl Default for KeyManagementOptions {
    /// 2-day activation delay and propagation window, 90-day key lifetime,
    /// 24-hour ring refresh, AES-256-CBC + HMAC-SHA-256.
    fn default() -> Self {
        Self {
            new_key_activation_delay: Duration::days(2),
            key_lifetime: Duration::days(90),
            key_propagation_window: Duration::days(2),
            ring_refresh_period: Duration::hours(24),
            ring_refresh_backoff: Duration::minutes(2),
            encryption_algorithm: EncryptionAlgorithm::Aes256Cbc,
            validation_algorithm: ValidationAlgorithm::HmacSha256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        KeyManagementOptions::default().validate().unwrap();
    }

    #[test]
    fn nonsense_durations_are_rejected() {
        let mut options = KeyManagementOptions::default();
        options.key_lifetime = Duration::zero();
        assert!(options.validate().is_err());

        let mut options = KeyManagementOptions::default();
        options.new_key_activation_delay = Duration::days(-1);
        assert!(options.validate().is_err());

        let mut options = KeyManagementOptions::default();
        options.ring_refresh_period = Duration::zero();
        assert!(options.validate().is_err());
    }
}
