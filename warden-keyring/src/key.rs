//! A managed key: lifecycle metadata plus a lazily built encryptor.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use warden_crypto::{AuthenticatedEncryptor, ConfigurationError, EncryptorDescriptor};

use crate::error::ProtectionError;

/// Produces the descriptor on first use. Deferred keys capture their at-rest
/// XML so nothing is decrypted during a ring scan.
pub type DescriptorThunk =
    Box<dyn Fn() -> Result<EncryptorDescriptor, ProtectionError> + Send + Sync>;

enum DescriptorSource {
    Parsed(EncryptorDescriptor),
    Deferred(DescriptorThunk),
}

/// A key in the ring.
///
/// Immutable after construction except for the revoked flag, which moves
/// from `false` to `true` at most once; concurrent readers may observe
/// either value during the transition.
pub struct Key {
    id: Uuid,
    creation_date: DateTime<Utc>,
    activation_date: DateTime<Utc>,
    expiration_date: DateTime<Utc>,
    revoked: AtomicBool,
    source: DescriptorSource,
    encryptor: Mutex<Option<Arc<dyn AuthenticatedEncryptor>>>,
}

impl Key {
    /// Key with an already-materialized descriptor (the creation path).
    pub fn new(
        id: Uuid,
        creation_date: DateTime<Utc>,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
        descriptor: EncryptorDescriptor,
    ) -> Result<Self, ConfigurationError> {
        Self::build(
            id,
            creation_date,
            activation_date,
            expiration_date,
            DescriptorSource::Parsed(descriptor),
        )
    }

    /// Key whose descriptor is produced on first encryptor use (the
    /// repository-scan path; at-rest decryption happens inside the thunk).
    pub fn deferred(
        id: Uuid,
        creation_date: DateTime<Utc>,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
        thunk: DescriptorThunk,
    ) -> Result<Self, ConfigurationError> {
        Self::build(
            id,
            creation_date,
            activation_date,
            expiration_date,
            DescriptorSource::Deferred(thunk),
        )
    }

    fn build(
        id: Uuid,
        creation_date: DateTime<Utc>,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
        source: DescriptorSource,
    ) -> Result<Self, ConfigurationError> {
        if activation_date < creation_date {
            return Err(ConfigurationError::new(format!(
                "key {} activates before its creation date",
                id
            )));
        }
        if expiration_date <= activation_date {
            return Err(ConfigurationError::new(format!(
                "key {} expires at or before its activation date",
                id
            )));
        }
        Ok(Self {
            id,
            creation_date,
            activation_date,
            expiration_date,
            revoked: AtomicBool::new(false),
            source,
            encryptor: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn activation_date(&self) -> DateTime<Utc> {
        self.activation_date
    }

    pub fn expiration_date(&self) -> DateTime<Utc> {
        self.expiration_date
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Monotonic: revocation is never undone.
    pub fn set_revoked(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    /// Activated, unexpired and not revoked at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.activation_date <= now && now < self.expiration_date && !self.is_revoked()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_date
    }

    /// The key's encryptor, built and memoized on first use.
    ///
    /// Descriptor materialization runs under this key's lock, so a ring full
    /// of deferred keys decrypts each at-rest element exactly once, on the
    /// first payload that needs it. Failures are not memoized; a transient
    /// decryption-service error is retried on the next call.
    pub fn encryptor(&self) -> Result<Arc<dyn AuthenticatedEncryptor>, ProtectionError> {
        let mut slot = self.encryptor.lock().unwrap();
        if let Some(encryptor) = slot.as_ref() {
            return Ok(encryptor.clone());
        }
        let encryptor = match &self.source {
            DescriptorSource::Parsed(descriptor) => descriptor.build_encryptor()?,
            DescriptorSource::Deferred(thunk) => thunk()?.build_encryptor()?,
        };
        *slot = Some(encryptor.clone());
        Ok(encryptor)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("creation_date", &self.creation_date)
            .field("activation_date", &self.activation_date)
            .field("expiration_date", &self.expiration_date)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}
