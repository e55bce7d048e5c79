//! Closed sets of algorithm identifiers.
//!
//! The on-disk names below are part of the persisted descriptor format and
//! must never change. Unknown names are rejected, never defaulted.

use core::fmt;

use crate::error::ConfigurationError;

/// Symmetric encryption algorithm for a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
}

impl EncryptionAlgorithm {
    pub const ALL: [EncryptionAlgorithm; 6] = [
        EncryptionAlgorithm::Aes128Cbc,
        EncryptionAlgorithm::Aes192Cbc,
        EncryptionAlgorithm::Aes256Cbc,
        EncryptionAlgorithm::Aes128Gcm,
        EncryptionAlgorithm::Aes192Gcm,
        EncryptionAlgorithm::Aes256Gcm,
    ];

    /// Persisted identifier.
    pub fn name(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes128Cbc => "AES_128_CBC",
            EncryptionAlgorithm::Aes192Cbc => "AES_192_CBC",
            EncryptionAlgorithm::Aes256Cbc => "AES_256_CBC",
            EncryptionAlgorithm::Aes128Gcm => "AES_128_GCM",
            EncryptionAlgorithm::Aes192Gcm => "AES_192_GCM",
            EncryptionAlgorithm::Aes256Gcm => "AES_256_GCM",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| {
                ConfigurationError::new(format!("unknown encryption algorithm '{}'", name))
            })
    }

    /// AES key size in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            EncryptionAlgorithm::Aes128Cbc | EncryptionAlgorithm::Aes128Gcm => 16,
            EncryptionAlgorithm::Aes192Cbc | EncryptionAlgorithm::Aes192Gcm => 24,
            EncryptionAlgorithm::Aes256Cbc | EncryptionAlgorithm::Aes256Gcm => 32,
        }
    }

    pub fn is_gcm(&self) -> bool {
        matches!(
            self,
            EncryptionAlgorithm::Aes128Gcm
                | EncryptionAlgorithm::Aes192Gcm
                | EncryptionAlgorithm::Aes256Gcm
        )
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// MAC algorithm for the CBC-then-HMAC variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationAlgorithm {
    HmacSha256,
    HmacSha512,
}

impl ValidationAlgorithm {
    pub const ALL: [ValidationAlgorithm; 2] =
        [ValidationAlgorithm::HmacSha256, ValidationAlgorithm::HmacSha512];

    /// Persisted identifier.
    pub fn name(&self) -> &'static str {
        match self {
            ValidationAlgorithm::HmacSha256 => "HMACSHA256",
            ValidationAlgorithm::HmacSha512 => "HMACSHA512",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| {
                ConfigurationError::new(format!("unknown validation algorithm '{}'", name))
            })
    }

    /// Tag length in bytes; also the HMAC sub-key length.
    pub fn tag_len(&self) -> usize {
        match self {
            ValidationAlgorithm::HmacSha256 => 32,
            ValidationAlgorithm::HmacSha512 => 64,
        }
    }
}

impl fmt::Display for ValidationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
