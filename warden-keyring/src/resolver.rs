//! Default-key selection.
//!
//! Pure and deterministic in `(now, keys)`; the provider acts on the
//! returned signals (genesis or rollover creation) and re-resolves.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::key::Key;

/// Outcome of a resolution pass.
pub struct DefaultKeyResolution {
    /// The key new payloads should use, if any key is currently active.
    pub default_key: Option<Arc<Key>>,
    /// Whether the caller should create a key: a genesis key when
    /// `default_key` is `None`, otherwise a rollover key activating at the
    /// current default's expiration.
    pub should_generate_new_key: bool,
}

/// Selects the active key most recently activated, with a deterministic
/// id tie-break, and decides whether rotation needs to be staged.
pub struct DefaultKeyResolver {
    propagation_window: Duration,
}

impl DefaultKeyResolver {
    pub fn new(propagation_window: Duration) -> Self {
        Self { propagation_window }
    }

    /// Resolve against a snapshot of all known keys.
    pub fn resolve(&self, now: DateTime<Utc>, keys: &[Arc<Key>]) -> DefaultKeyResolution {
        // Most recently activated wins; ties break on the 16-byte id so the
        // result is identical across processes scanning the same repository.
        let default_key = keys
            .iter()
            .filter(|key| key.is_active(now))
            .max_by_key(|key| (key.activation_date(), *key.id().as_bytes()))
            .cloned();

        let Some(default_key) = default_key else {
            // No active key at all: signal genesis.
            return DefaultKeyResolution {
                default_key: None,
                should_generate_new_key: true,
            };
        };

        let near_expiration =
            default_key.expiration_date() - now < self.propagation_window;
        let successor_staged = keys.iter().any(|key| {
            !key.is_revoked()
                && key.activation_date() > default_key.activation_date()
                && key.activation_date()
                    <= default_key.expiration_date() + self.propagation_window
        });

        DefaultKeyResolution {
            default_key: Some(default_key),
            should_generate_new_key: near_expiration && !successor_staged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_crypto::{EncryptionAlgorithm, EncryptorDescriptor, ValidationAlgorithm};

    fn key(
        id: Uuid,
        creation: DateTime<Utc>,
        activation: DateTime<Utc>,
        expiration: DateTime<Utc>,
    ) -> Arc<Key> {
        Arc::new(
            Key::new(
                id,
                creation,
                activation,
                expiration,
                EncryptorDescriptor::generate(
                    EncryptionAlgorithm::Aes128Gcm,
                    ValidationAlgorithm::HmacSha256,
                )
                .unwrap(),
            )
            .unwrap(),
        )
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        epoch() + Duration::seconds(seconds)
    }

    fn resolver() -> DefaultKeyResolver {
        DefaultKeyResolver::new(Duration::days(2))
    }

    #[test]
    fn empty_set_signals_genesis() {
        let resolution = resolver().resolve(at(0), &[]);
        assert!(resolution.default_key.is_none());
        assert!(resolution.should_generate_new_key);
    }

    #[test]
    fn most_recently_activated_active_key_wins() {
        // Keys activated at t=0 (revoked), t=10, t=20; now = 25.
        let revoked = key(Uuid::new_v4(), at(0), at(0), at(0) + Duration::days(90));
        revoked.set_revoked();
        let older = key(Uuid::new_v4(), at(0), at(10), at(10) + Duration::days(90));
        let newer = key(Uuid::new_v4(), at(0), at(20), at(20) + Duration::days(90));

        let keys = vec![revoked, older, newer.clone()];
        let resolution = resolver().resolve(at(25), &keys);
        assert_eq!(resolution.default_key.unwrap().id(), newer.id());
        assert!(!resolution.should_generate_new_key);
    }

    #[test]
    fn not_yet_activated_keys_are_ignored() {
        let active = key(Uuid::new_v4(), at(0), at(0), at(0) + Duration::days(90));
        let future = key(Uuid::new_v4(), at(0), at(100), at(100) + Duration::days(90));
        let resolution = resolver().resolve(at(50), &[active.clone(), future]);
        assert_eq!(resolution.default_key.unwrap().id(), active.id());
    }

    #[test]
    fn activation_ties_break_on_id_deterministically() {
        let low = Uuid::from_bytes([0x01; 16]);
        let high = Uuid::from_bytes([0xFE; 16]);
        let a = key(low, at(0), at(0), at(0) + Duration::days(90));
        let b = key(high, at(0), at(0), at(0) + Duration::days(90));

        for keys in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            let resolution = resolver().resolve(at(1), &keys);
            assert_eq!(resolution.default_key.unwrap().id(), high);
        }
    }

    #[test]
    fn near_expiration_without_successor_requests_rollover() {
        let expiring = key(Uuid::new_v4(), at(0), at(0), at(0) + Duration::days(1));
        let resolution = resolver().resolve(at(0), &[expiring.clone()]);
        assert_eq!(resolution.default_key.as_ref().unwrap().id(), expiring.id());
        assert!(resolution.should_generate_new_key);
    }

    #[test]
    fn staged_successor_suppresses_rollover() {
        let expiring = key(Uuid::new_v4(), at(0), at(0), at(0) + Duration::days(1));
        let successor = key(
            Uuid::new_v4(),
            at(0),
            at(0) + Duration::days(1),
            at(0) + Duration::days(91),
        );
        let resolution = resolver().resolve(at(0), &[expiring.clone(), successor]);
        // The expiring key stays default; no new key is needed.
        assert_eq!(resolution.default_key.unwrap().id(), expiring.id());
        assert!(!resolution.should_generate_new_key);
    }

    #[test]
    fn revoked_successor_does_not_suppress_rollover() {
        let expiring = key(Uuid::new_v4(), at(0), at(0), at(0) + Duration::days(1));
        let successor = key(
            Uuid::new_v4(),
            at(0),
            at(0) + Duration::days(1),
            at(0) + Duration::days(91),
        );
        successor.set_revoked();
        let resolution = resolver().resolve(at(0), &[expiring, successor]);
        assert!(resolution.should_generate_new_key);
    }

    #[test]
    fn resolution_is_deterministic_across_runs() {
        let keys: Vec<Arc<Key>> = (0..8)
            .map(|i| {
                key(
                    Uuid::from_bytes([i as u8 + 1; 16]),
                    at(0),
                    at(i * 10),
                    at(i * 10) + Duration::days(90),
                )
            })
            .collect();

        let first = resolver().resolve(at(100), &keys).default_key.unwrap().id();
        for _ in 0..10 {
            let mut shuffled = keys.clone();
            shuffled.reverse();
            assert_eq!(
                resolver().resolve(at(100), &shuffled).default_key.unwrap().id(),
                first
            );
        }
    }
}
