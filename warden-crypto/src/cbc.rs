//! CBC-then-HMAC authenticated encryptor.
//!
//! Per-payload protocol:
//!   1. sample key_modifier[16] and iv[16]
//!   2. enc_key || mac_key = KDF(master, label = aad, context = key_modifier || iv)
//!   3. ciphertext = AES-CBC(enc_key, iv, plaintext) with PKCS7 padding
//!   4. tag = HMAC(mac_key, key_modifier || iv || ciphertext)
//!   5. emit key_modifier || iv || ciphertext || tag

use std::sync::Arc;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::algorithms::{EncryptionAlgorithm, ValidationAlgorithm};
use crate::error::{ConfigurationError, CryptographicFailure};
use crate::secret::Secret;
use crate::{kdf, rand, AuthenticatedEncryptor, KEY_MODIFIER_LEN, MASTER_KEY_MIN_LEN};

/// AES block size; also the IV size.
pub const CBC_IV_LEN: usize = 16;

const CBC_BLOCK_LEN: usize = 16;

/// CBC-then-HMAC variant. Sub-keys are derived per payload, so the AES and
/// HMAC keys never repeat across payloads even under the same master secret.
pub struct CbcHmacEncryptor {
    encryption: EncryptionAlgorithm,
    validation: ValidationAlgorithm,
    master: Arc<Secret>,
}

impl CbcHmacEncryptor {
    pub fn new(
        encryption: EncryptionAlgorithm,
        validation: ValidationAlgorithm,
        master: Arc<Secret>,
    ) -> Result<Self, ConfigurationError> {
        if encryption.is_gcm() {
            return Err(ConfigurationError::new(format!(
                "{} is not a CBC algorithm",
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
        Ok(Self {
            encryption,
            validation,
            master,
        })
    }

    fn derive_sub_keys(
        &self,
        aad: &[u8],
        key_modifier: &[u8],
        iv: &[u8],
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, CryptographicFailure> {
        let mut context = Vec::with_capacity(key_modifier.len() + iv.len());
        context.extend_from_slice(key_modifier);
        context.extend_from_slice(iv);
        let len = self.encryption.key_len() + self.validation.tag_len();
        self.master.with_bytes(|kdk| kdf::derive(kdk, aad, &context, len))
    }

    fn seal_with(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        key_modifier: &[u8; KEY_MODIFIER_LEN],
        iv: &[u8; CBC_IV_LEN],
    ) -> Result<Vec<u8>, CryptographicFailure> {
        let sub_keys = self.derive_sub_keys(aad, key_modifier, iv)?;
        let (enc_key, mac_key) = sub_keys.split_at(self.encryption.key_len());

        let ciphertext = match self.encryption {
            EncryptionAlgorithm::Aes128Cbc => cbc_encrypt::<Aes128>(enc_key, iv, plaintext)?,
            EncryptionAlgorithm::Aes192Cbc => cbc_encrypt::<Aes192>(enc_key, iv, plaintext)?,
            EncryptionAlgorithm::Aes256Cbc => cbc_encrypt::<Aes256>(enc_key, iv, plaintext)?,
            _ => return Err(CryptographicFailure),
        };

        let mut out = Vec::with_capacity(
            KEY_MODIFIER_LEN + CBC_IV_LEN + ciphertext.len() + self.validation.tag_len(),
        );
        out.extend_from_slice(key_modifier);
        out.extend_from_slice(iv);
        out.extend_from_slice(&ciphertext);

        let tag = hmac_tag(self.validation, mac_key, &out)?;
        out.extend_from_slice(&tag);
        Ok(out)
    }
}

impl AuthenticatedEncryptor for CbcHmacEncryptor {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptographicFailure> {
        let key_modifier = rand::array::<KEY_MODIFIER_LEN>()?;
        let iv = rand::array::<CBC_IV_LEN>()?;
        self.seal_with(plaintext, aad, &key_modifier, &iv)
    }

    fn decrypt(&self, protected: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptographicFailure> {
        let tag_len = self.validation.tag_len();
        // Smallest valid payload carries one padded block of ciphertext.
        if protected.len() < KEY_MODIFIER_LEN + CBC_IV_LEN + CBC_BLOCK_LEN + tag_len {
            return Err(CryptographicFailure);
        }

        let (signed, tag) = protected.split_at(protected.len() - tag_len);
        let key_modifier = &signed[..KEY_MODIFIER_LEN];
        let iv = &signed[KEY_MODIFIER_LEN..KEY_MODIFIER_LEN + CBC_IV_LEN];
        let ciphertext = &signed[KEY_MODIFIER_LEN + CBC_IV_LEN..];
        if ciphertext.len() % CBC_BLOCK_LEN != 0 {
            return Err(CryptographicFailure);
        }

        let sub_keys = self.derive_sub_keys(aad, key_modifier, iv)?;
        let (enc_key, mac_key) = sub_keys.split_at(self.encryption.key_len());

        // Verify-then-decrypt; the MAC covers key_modifier || iv || ciphertext.
        hmac_verify(self.validation, mac_key, signed, tag)?;

        match self.encryption {
            EncryptionAlgorithm::Aes128Cbc => cbc_decrypt::<Aes128>(enc_key, iv, ciphertext),
            EncryptionAlgorithm::Aes192Cbc => cbc_decrypt::<Aes192>(enc_key, iv, ciphertext),
            EncryptionAlgorithm::Aes256Cbc => cbc_decrypt::<Aes256>(enc_key, iv, ciphertext),
            _ => Err(CryptographicFailure),
        }
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptographicFailure>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let enc = cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(|_| CryptographicFailure)?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptographicFailure>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let dec = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| CryptographicFailure)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptographicFailure)
}

fn hmac_tag(
    validation: ValidationAlgorithm,
    mac_key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, CryptographicFailure> {
    match validation {
        ValidationAlgorithm::HmacSha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
                .map_err(|_| CryptographicFailure)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        ValidationAlgorithm::HmacSha512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key)
                .map_err(|_| CryptographicFailure)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// Constant-time tag check via `Mac::verify_slice`.
fn hmac_verify(
    validation: ValidationAlgorithm,
    mac_key: &[u8],
    data: &[u8],
    tag: &[u8],
) -> Result<(), CryptographicFailure> {
    match validation {
        ValidationAlgorithm::HmacSha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
                .map_err(|_| CryptographicFailure)?;
            mac.update(data);
            mac.verify_slice(tag).map_err(|_| CryptographicFailure)
        }
        ValidationAlgorithm::HmacSha512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key)
                .map_err(|_| CryptographicFailure)?;
            mac.update(data);
            mac.verify_slice(tag).map_err(|_| CryptographicFailure)
        }
    }
}
