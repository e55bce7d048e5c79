//! AES-GCM authenticated encryptor.
//!
//! Per-payload protocol:
//!   1. sample key_modifier[16] and nonce[12]
//!   2. enc_key = KDF(master, label = aad, context = key_modifier || nonce)
//!   3. ciphertext || tag = AES-GCM(enc_key, nonce, plaintext)
//!   4. emit key_modifier || nonce || ciphertext || tag
//!
//! The AEAD itself runs with empty associated data; the caller's AAD is
//! bound through the KDF label instead, so a wrong AAD derives a wrong key
//! and the tag check fails just the same.

use std::sync::Arc;

use aes::cipher::consts::U12;
use aes::Aes192;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};

use crate::algorithms::EncryptionAlgorithm;
use crate::error::{ConfigurationError, CryptographicFailure};
use crate::secret::Secret;
use crate::{kdf, rand, AuthenticatedEncryptor, KEY_MODIFIER_LEN, MASTER_KEY_MIN_LEN};

/// GCM nonce size in bytes.
pub const GCM_NONCE_LEN: usize = 12;

/// GCM authentication tag size in bytes.
pub const GCM_TAG_LEN: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-GCM variant with per-payload sub-key derivation.
pub struct GcmEncryptor {
    encryption: EncryptionAlgorithm,
    master: Arc<Secret>,
}

impl GcmEncryptor {
    pub fn new(
        encryption: EncryptionAlgorithm,
        master: Arc<Secret>,
    ) -> Result<Self, ConfigurationError> {
        if !encryption.is_gcm() {
            return Err(ConfigurationError::new(format!(
                "{} is not a GCM algorithm",
                encryption
            )));
        }
        if master.len() < MASTER_KEY_MIN_LEN {
            return Err(ConfigurationError::new(format!(
                "master secret must be at least {} bytes, got {}",
                MASTER_KEY_MIN_LEN,
                master.len()
            )));
        }
        Ok(Self { encryption, master })
    }

    fn derive_sub_key(
        &self,
        aad: &[u8],
        key_modifier: &[u8],
        nonce: &[u8],
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, CryptographicFailure> {
        let mut context = Vec::with_capacity(key_modifier.len() + nonce.len());
        context.extend_from_slice(key_modifier);
        context.extend_from_slice(nonce);
        self.master
            .with_bytes(|kdk| kdf::derive(kdk, aad, &context, self.encryption.key_len()))
    }

    fn seal_with(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        key_modifier: &[u8; KEY_MODIFIER_LEN],
        nonce: &[u8; GCM_NONCE_LEN],
    ) -> Result<Vec<u8>, CryptographicFailure> {
        let sub_key = self.derive_sub_key(aad, key_modifier, nonce)?;

        let sealed = match self.encryption {
            EncryptionAlgorithm::Aes128Gcm => gcm_seal::<Aes128Gcm>(&sub_key, nonce, plaintext)?,
            EncryptionAlgorithm::Aes192Gcm => gcm_seal::<Aes192Gcm>(&sub_key, nonce, plaintext)?,
            EncryptionAlgorithm::Aes256Gcm => gcm_seal::<Aes256Gcm>(&sub_key, nonce, plaintext)?,
            _ => return Err(CryptographicFailure),
        };

        let mut out = Vec::with_capacity(KEY_MODIFIER_LEN + GCM_NONCE_LEN + sealed.len());
        out.extend_from_slice(key_modifier);
        out.extend_from_slice(nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

impl AuthenticatedEncryptor for GcmEncryptor {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptographicFailure> {
        let key_modifier = rand::array::<KEY_MODIFIER_LEN>()?;
        let nonce = rand::array::<GCM_NONCE_LEN>()?;
        self.seal_with(plaintext, aad, &key_modifier, &nonce)
    }

    fn decrypt(&self, protected: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptographicFailure> {
        if protected.len() < KEY_MODIFIER_LEN + GCM_NONCE_LEN + GCM_TAG_LEN {
            return Err(CryptographicFailure);
        }

        let key_modifier = &protected[..KEY_MODIFIER_LEN];
        let nonce = &protected[KEY_MODIFIER_LEN..KEY_MODIFIER_LEN + GCM_NONCE_LEN];
        let sealed = &protected[KEY_MODIFIER_LEN + GCM_NONCE_LEN..];

        let sub_key = self.derive_sub_key(aad, key_modifier, nonce)?;

        match self.encryption {
            EncryptionAlgorithm::Aes128Gcm => gcm_open::<Aes128Gcm>(&sub_key, nonce, sealed),
            EncryptionAlgorithm::Aes192Gcm => gcm_open::<Aes192Gcm>(&sub_key, nonce, sealed),
            EncryptionAlgorithm::Aes256Gcm => gcm_open::<Aes256Gcm>(&sub_key, nonce, sealed),
            _ => Err(CryptographicFailure),
        }
    }
}

fn gcm_seal<C>(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptographicFailure>
where
    C: Aead + KeyInit + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| CryptographicFailure)?;
    let payload = Payload {
        msg: plaintext,
        aad: b"",
    };
    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptographicFailure)
}

fn gcm_open<C>(key: &[u8], nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptographicFailure>
where
    C: Aead + KeyInit + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| CryptographicFailure)?;
    let payload = Payload {
        msg: sealed,
        aad: b"",
    };
    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptographicFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor(encryption: EncryptionAlgorithm) -> GcmEncryptor {
        let master = Arc::new(Secret::from_bytes(&[0xC3; 64]));
        GcmEncryptor::new(encryption, master).unwrap()
    }

    #[test]
    fn round_trip_all_sizes() {
        for encryption in [
            EncryptionAlgorithm::Aes128Gcm,
            EncryptionAlgorithm::Aes192Gcm,
            EncryptionAlgorithm::Aes256Gcm,
        ] {
            let enc = encryptor(encryption);
            let protected = enc.encrypt(b"attack at dawn", b"aad").unwrap();
            assert_eq!(enc.decrypt(&protected, b"aad").unwrap(), b"attack at dawn");
        }
    }

    #[test]
    fn output_layout() {
        let enc = encryptor(EncryptionAlgorithm::Aes256Gcm);
        let protected = enc.encrypt(&[1, 2, 3, 4, 5], b"aad").unwrap();
        // GCM ciphertext is plaintext-sized; no padding.
        assert_eq!(protected.len(), 16 + 12 + 5 + 16);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let enc = encryptor(EncryptionAlgorithm::Aes128Gcm);
        let protected = enc.encrypt(b"", b"aad").unwrap();
        assert_eq!(protected.len(), 16 + 12 + 16);
        assert_eq!(enc.decrypt(&protected, b"aad").unwrap(), b"");
    }

    #[test]
    fn wrong_aad_fails() {
        let enc = encryptor(EncryptionAlgorithm::Aes256Gcm);
        let protected = enc.encrypt(b"data", b"good").unwrap();
        assert_eq!(enc.decrypt(&protected, b"bad"), Err(CryptographicFailure));
    }

    #[test]
    fn any_flipped_bit_fails() {
        let enc = encryptor(EncryptionAlgorithm::Aes256Gcm);
        let protected = enc.encrypt(b"data", b"aad").unwrap();
        for index in 0..protected.len() {
            let mut tampered = protected.clone();
            tampered[index] ^= 0x01;
            assert_eq!(enc.decrypt(&tampered, b"aad"), Err(CryptographicFailure));
        }
    }

    #[test]
    fn truncated_payload_fails() {
        let enc = encryptor(EncryptionAlgorithm::Aes192Gcm);
        let protected = enc.encrypt(b"data", b"aad").unwrap();
        assert_eq!(enc.decrypt(&protected[..protected.len() - 1], b"aad"), Err(CryptographicFailure));
        assert_eq!(enc.decrypt(&protected[..20], b"aad"), Err(CryptographicFailure));
        assert_eq!(enc.decrypt(b"", b"aad"), Err(CryptographicFailure));
    }

    #[test]
    fn rejects_cbc_algorithm() {
        let master = Arc::new(Secret::from_bytes(&[0u8; 64]));
        assert!(GcmEncryptor::new(EncryptionAlgorithm::Aes256Cbc, master).is_err());
    }
}
