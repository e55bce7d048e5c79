//! Key-ring provider: caches the current ring and rebuilds it on demand.
//!
//! One critical section guards `(snapshot, rebuilding, epoch)`. The repository
//! scan runs outside the lock; concurrent callers that arrive while a rebuild
//! is in flight wait on a condition variable for its result, so an expiry
//! cycle costs exactly one scan no matter how many threads hit it.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::error::{ProtectionError, RepositoryError};
use crate::key::Key;
use crate::manager::XmlKeyManager;
use crate::resolver::DefaultKeyResolver;
use crate::ring::KeyRing;

/// How long a caller waits on another thread's in-flight rebuild before
/// falling back to stale-or-error.
const REBUILD_WAIT: StdDuration = StdDuration::from_secs(10);

struct CachedRing {
    ring: Arc<KeyRing>,
    refresh_at: DateTime<Utc>,
    epoch: u64,
}

struct ProviderState {
    snapshot: Option<CachedRing>,
    rebuilding: bool,
    epoch: u64,
}

/// Serves key-ring snapshots with single-flight rebuild and a
/// serve-stale-on-error policy.
pub struct KeyRingProvider {
    manager: Arc<XmlKeyManager>,
    resolver: DefaultKeyResolver,
    state: Mutex<ProviderState>,
    rebuilt: Condvar,
}

impl KeyRingProvider {
    pub fn new(manager: Arc<XmlKeyManager>) -> Self {
        let resolver = DefaultKeyResolver::new(manager.options().key_propagation_window);
        Self {
            manager,
            resolver,
            state: Mutex::new(ProviderState {
                snapshot: None,
                rebuilding: false,
                epoch: 0,
            }),
            rebuilt: Condvar::new(),
        }
    }

    pub fn manager(&self) -> &Arc<XmlKeyManager> {
        &self.manager
    }

    /// Expire the cached snapshot. The next `current_ring` call rebuilds;
    /// calls already in flight may still complete against the old ring.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        state.epoch += 1;
    }

    /// A non-expired ring snapshot, rebuilding if necessary.
    pub fn current_ring(&self) -> Result<Arc<KeyRing>, ProtectionError> {
        let mut state = self.state.lock().unwrap();
        loop {
            let now = Utc::now();
            if let Some(cached) = &state.snapshot {
                if cached.epoch == state.epoch && now < cached.refresh_at {
                    return Ok(cached.ring.clone());
                }
            }

            if state.rebuilding {
                let (guard, timeout) = self.rebuilt.wait_timeout(state, REBUILD_WAIT).unwrap();
                state = guard;
                if timeout.timed_out() {
                    // The in-flight rebuild is wedged (unreachable
                    // repository). Fall back rather than blocking forever.
                    return match &state.snapshot {
                        Some(cached) => Ok(cached.ring.clone()),
                        None => {
                            Err(RepositoryError::new("key ring rebuild timed out").into())
                        }
                    };
                }
                continue;
            }

            state.rebuilding = true;
            let epoch = state.epoch;
            drop(state);

            let result = self.build_ring(now);

            state = self.state.lock().unwrap();
            state.rebuilding = false;
            self.rebuilt.notify_all();

            match result {
                Ok((ring, refresh_at)) => {
                    tracing::info!(
                        default_key = %ring.default_key().id(),
                        keys = ring.len(),
                        refresh_at = %refresh_at,
                        "published new key ring"
                    );
                    state.snapshot = Some(CachedRing {
                        ring: ring.clone(),
                        refresh_at,
                        epoch,
                    });
                    return Ok(ring);
                }
                Err(error) => {
                    if let Some(cached) = &mut state.snapshot {
                        tracing::warn!(
                            error = %error,
                            "key ring rebuild failed; serving stale snapshot"
                        );
                        cached.refresh_at =
                            Utc::now() + self.manager.options().ring_refresh_backoff;
                        cached.epoch = epoch;
                        return Ok(cached.ring.clone());
                    }
                    return Err(error);
                }
            }
        }
    }

    /// One repository scan plus default-key resolution, creating a genesis
    /// or rollover key when the resolver asks for one.
    fn build_ring(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Arc<KeyRing>, DateTime<Utc>), ProtectionError> {
        let options = self.manager.options().clone();
        let mut keys = self.manager.get_all_keys()?;
        let resolution = self.resolver.resolve(now, &keys);

        let default_key: Arc<Key> = match resolution.default_key {
            Some(default_key) if !resolution.should_generate_new_key => default_key,
            Some(default_key) => {
                // Rollover: stage a successor activating when the current
                // default expires; the default itself stays in service.
                let activation = default_key.expiration_date();
                match self
                    .manager
                    .create_new_key(activation, activation + options.key_lifetime)
                {
                    Ok(successor) => keys.push(successor),
                    Err(error) => {
                        // The current default still works; retry at the next
                        // refresh instead of failing the ring.
                        tracing::warn!(error = %error, "failed to stage rollover key");
                    }
                }
                default_key
            }
            None => {
                // Genesis: nothing usable exists, so the new key activates
                // immediately.
                let genesis = self
                    .manager
                    .create_new_key(now, now + options.key_lifetime)?;
                tracing::info!(key_id = %genesis.id(), "created genesis key");
                keys.push(genesis.clone());
                genesis
            }
        };

        let refresh_at =
            (now + options.ring_refresh_period).min(default_key.expiration_date());
        Ok((Arc::new(KeyRing::new(default_key, keys, now)), refresh_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::KeyManagementOptions;
    use crate::repository::{InMemoryRepository, XmlRepository};
    use crate::xml_crypto::NullXmlEncryptor;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use warden_crypto::XmlElement;

    /// Counts scans and optionally fails them, for cache/serve-stale tests.
    struct InstrumentedRepository {
        inner: InMemoryRepository,
        scans: AtomicUsize,
        fail_reads: AtomicBool,
    }

    impl InstrumentedRepository {
        fn new() -> Self {
            Self {
                inner: InMemoryRepository::new(),
                scans: AtomicUsize::new(0),
                fail_reads: AtomicBool::new(false),
            }
        }
    }

    impl XmlRepository for InstrumentedRepository {
        fn get_all_elements(&self) -> Result<Vec<XmlElement>, crate::error::RepositoryError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(crate::error::RepositoryError::new("injected failure"));
            }
            self.inner.get_all_elements()
        }

        fn store_element(
            &self,
            element: &XmlElement,
            friendly_name: &str,
        ) -> Result<(), crate::error::RepositoryError> {
            self.inner.store_element(element, friendly_name)
        }
    }

    fn provider_over(
        repository: Arc<InstrumentedRepository>,
        options: KeyManagementOptions,
    ) -> KeyRingProvider {
        let manager =
            XmlKeyManager::new(repository, Arc::new(NullXmlEncryptor), options).unwrap();
        KeyRingProvider::new(Arc::new(manager))
    }

    #[test]
    fn empty_repository_gets_a_genesis_key() {
        let repository = Arc::new(InstrumentedRepository::new());
        let provider = provider_over(repository.clone(), KeyManagementOptions::default());

        let ring = provider.current_ring().unwrap();
        assert_eq!(ring.len(), 1);
        assert!(ring.default_key().is_active(Utc::now()));
        // The genesis key was persisted, not just fabricated in memory.
        assert_eq!(repository.inner.get_all_elements().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_is_cached_between_calls() {
        let repository = Arc::new(InstrumentedRepository::new());
        let provider = provider_over(repository.clone(), KeyManagementOptions::default());

        let first = provider.current_ring().unwrap();
        let scans_after_first = repository.scans.load(Ordering::SeqCst);
        for _ in 0..10 {
            let ring = provider.current_ring().unwrap();
            assert!(Arc::ptr_eq(&first, &ring));
        }
        assert_eq!(repository.scans.load(Ordering::SeqCst), scans_after_first);
    }

    #[test]
    fn invalidate_forces_a_rebuild() {
        let repository = Arc::new(InstrumentedRepository::new());
        let provider = provider_over(repository.clone(), KeyManagementOptions::default());

        let first = provider.current_ring().unwrap();
        provider.invalidate();
        let second = provider.current_ring().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        // Same persisted default key in both snapshots.
        assert_eq!(first.default_key().id(), second.default_key().id());
    }

    #[test]
    fn rebuild_failure_serves_stale_snapshot() {
        let repository = Arc::new(InstrumentedRepository::new());
        let provider = provider_over(repository.clone(), KeyManagementOptions::default());

        let first = provider.current_ring().unwrap();
        repository.fail_reads.store(true, Ordering::SeqCst);
        provider.invalidate();

        let stale = provider.current_ring().unwrap();
        assert!(Arc::ptr_eq(&first, &stale));

        // Back-off: the stale ring keeps being served without a scan storm.
        let scans = repository.scans.load(Ordering::SeqCst);
        for _ in 0..5 {
            provider.current_ring().unwrap();
        }
        assert_eq!(repository.scans.load(Ordering::SeqCst), scans);
    }

    #[test]
    fn failure_with_no_snapshot_surfaces_repository_error() {
        let repository = Arc::new(InstrumentedRepository::new());
        repository.fail_reads.store(true, Ordering::SeqCst);
        let provider = provider_over(repository, KeyManagementOptions::default());

        assert!(matches!(
            provider.current_ring(),
            Err(ProtectionError::Repository(_))
        ));
    }

    #[test]
    fn near_expiration_stages_a_rollover_key() {
        let options = KeyManagementOptions {
            key_lifetime: Duration::days(1),
            key_propagation_window: Duration::days(2),
            ..KeyManagementOptions::default()
        };
        let repository = Arc::new(InstrumentedRepository::new());
        let provider = provider_over(repository, options);

        // Genesis key expires within the propagation window.
        let first = provider.current_ring().unwrap();
        assert_eq!(first.len(), 1);

        provider.invalidate();
        let second = provider.current_ring().unwrap();
        assert_eq!(second.len(), 2, "rollover key should be staged");
        // The default stays on the current key until it actually expires.
        assert_eq!(second.default_key().id(), first.default_key().id());

        let successor = second
            .keys()
            .find(|key| key.id() != first.default_key().id())
            .unwrap();
        assert_eq!(
            successor.activation_date(),
            first.default_key().expiration_date()
        );
    }

    #[test]
    fn refresh_deadline_never_outlives_default_key() {
        let options = KeyManagementOptions {
            key_lifetime: Duration::hours(1),
            key_propagation_window: Duration::minutes(5),
            ..KeyManagementOptions::default()
        };
        let repository = Arc::new(InstrumentedRepository::new());
        let provider = provider_over(repository.clone(), options);

        provider.current_ring().unwrap();
        let state = provider.state.lock().unwrap();
        let cached = state.snapshot.as_ref().unwrap();
        assert!(cached.refresh_at <= cached.ring.default_key().expiration_date());
    }
}
