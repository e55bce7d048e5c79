//! Purpose-scoped protectors: the public protect/unprotect surface.

use std::sync::Arc;

use chrono::{Duration, Utc};
use warden_crypto::CryptographicFailure;

use crate::aad::{self, HEADER_LEN};
use crate::error::ProtectionError;
use crate::provider::KeyRingProvider;

/// Root of the protector hierarchy. Hand one of these to application code;
/// every consumer derives its own purpose-scoped [`DataProtector`].
pub struct DataProtectionProvider {
    key_ring_provider: Arc<KeyRingProvider>,
}

impl DataProtectionProvider {
    pub fn new(key_ring_provider: Arc<KeyRingProvider>) -> Self {
        Self { key_ring_provider }
    }

    pub fn key_ring_provider(&self) -> &Arc<KeyRingProvider> {
        &self.key_ring_provider
    }

    /// A protector whose purpose chain is `[purpose]`.
    pub fn create_protector(&self, purpose: &str) -> Result<DataProtector, ProtectionError> {
        DataProtector::with_chain(self.key_ring_provider.clone(), Vec::new(), purpose)
    }
}

/// Options for [`DataProtector::unprotect_with`].
#[derive(Clone, Debug, Default)]
pub struct UnprotectOptions {
    /// Permit decryption with a revoked key.
    pub allow_revoked: bool,
    /// How long past a key's expiration payloads may still be opened.
    /// `None` means expiration never blocks decryption (it only ever gates
    /// the choice of encryption key).
    pub decryption_grace: Option<Duration>,
}

/// What [`DataProtector::unprotect_with`] learned about the payload's key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnprotectStatus {
    /// The payload's key was revoked (decryption was explicitly allowed).
    pub was_revoked: bool,
    /// The payload's key is no longer the ring default; callers should
    /// re-protect the plaintext at their next write.
    pub requires_migration: bool,
}

/// Protects and unprotects payloads under one purpose chain.
///
/// Safe for concurrent use; the only blocking point is the key-ring
/// provider's single-flight rebuild.
pub struct DataProtector {
    key_ring_provider: Arc<KeyRingProvider>,
    purposes: Vec<String>,
    purpose_digest: [u8; aad::PURPOSE_DIGEST_LEN],
}

impl DataProtector {
    fn with_chain(
        key_ring_provider: Arc<KeyRingProvider>,
        mut purposes: Vec<String>,
        purpose: &str,
    ) -> Result<Self, ProtectionError> {
        if purpose.is_empty() {
            return Err(ProtectionError::InvalidArgument("purpose must not be empty"));
        }
        purposes.push(purpose.to_string());
        let purpose_digest = aad::purpose_digest(&purposes);
        Ok(Self {
            key_ring_provider,
            purposes,
            purpose_digest,
        })
    }

    /// A child protector with `purpose` appended to this chain.
    ///
    /// Payloads protected by the child cannot be unprotected by the parent,
    /// and vice versa.
    pub fn create_protector(&self, purpose: &str) -> Result<DataProtector, ProtectionError> {
        DataProtector::with_chain(
            self.key_ring_provider.clone(),
            self.purposes.clone(),
            purpose,
        )
    }

    /// The purpose chain this protector is bound to.
    pub fn purposes(&self) -> &[String] {
        &self.purposes
    }

    /// Protect `plaintext` under the ring's current default key.
    pub fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        let ring = self.key_ring_provider.current_ring()?;
        let key = ring.default_key();
        let encryptor = key.encryptor()?;

        let key_id = key.id();
        let aad = aad::build_aad(&key_id, &self.purpose_digest);
        let body = encryptor.encrypt(plaintext, &aad)?;

        let mut payload = Vec::with_capacity(HEADER_LEN + body.len());
        payload.extend_from_slice(&aad::build_header(&key_id));
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    /// Unprotect a payload produced by a protector with this exact chain.
    pub fn unprotect(&self, payload: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        self.unprotect_with(payload, &UnprotectOptions::default())
            .map(|(plaintext, _)| plaintext)
    }

    /// Unprotect with explicit key-status policy, reporting what was found.
    ///
    /// Bad magic, unknown key id, tampered bytes and a revoked key without
    /// `allow_revoked` all produce the same opaque cryptographic failure.
    pub fn unprotect_with(
        &self,
        payload: &[u8],
        options: &UnprotectOptions,
    ) -> Result<(Vec<u8>, UnprotectStatus), ProtectionError> {
        let key_id = aad::parse_header(payload).ok_or(CryptographicFailure)?;

        let ring = self.key_ring_provider.current_ring()?;
        let key = ring.key(&key_id).ok_or(CryptographicFailure)?;

        let was_revoked = key.is_revoked();
        if was_revoked && !options.allow_revoked {
            return Err(CryptographicFailure.into());
        }
        let now = Utc::now();
        if let Some(grace) = options.decryption_grace {
            if now > key.expiration_date() + grace {
                return Err(CryptographicFailure.into());
            }
        }

        let aad = aad::build_aad(&key_id, &self.purpose_digest);
        let plaintext = key.encryptor()?.decrypt(&payload[HEADER_LEN..], &aad)?;

        let requires_migration =
            key_id != ring.default_key().id() || was_revoked || key.is_expired(now);
        Ok((
            plaintext,
            UnprotectStatus {
                was_revoked,
                requires_migration,
            },
        ))
    }
}
