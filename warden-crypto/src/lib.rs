//! # Warden Crypto
//!
//! Authenticated-encryption core for the Warden data-protection stack.
//!
//! ## Quick Start
//!
//! ```rust
//! use warden_crypto::{
//!     AuthenticatedEncryptor, EncryptionAlgorithm, EncryptorDescriptor, ValidationAlgorithm,
//! };
//!
//! let descriptor = EncryptorDescriptor::generate(
//!     EncryptionAlgorithm::Aes256Gcm,
//!     ValidationAlgorithm::HmacSha256, // ignored for GCM
//! )
//! .unwrap();
//!
//! let encryptor = descriptor.build_encryptor().unwrap();
//! let protected = encryptor.encrypt(b"secret", b"aad").unwrap();
//! let plaintext = encryptor.decrypt(&protected, b"aad").unwrap();
//!
//! assert_eq!(plaintext, b"secret");
//! ```
//!
//! ## Security Properties
//!
//! - **Per-payload sub-keys**: every payload derives fresh AES/HMAC keys
//!   from the master secret via SP800-108, keyed on a random modifier
//! - **Uniform errors**: all decrypt failures produce one identical value
//! - **AAD binding**: the caller's AAD is the KDF label, so wrong metadata
//!   derives wrong keys and authentication fails
//! - **Zero-on-drop secrets**: master material lives in wiped buffers
//!
//! ## What's NOT Provided
//!
//! - Key lifecycle management (see `warden-keyring`)
//! - Streaming encryption
//! - FIPS certification

#![deny(unsafe_code)]

mod error;
mod rand;

pub mod algorithms;
pub mod cbc;
pub mod descriptor;
pub mod gcm;
pub mod kdf;
pub mod secret;
pub mod xml;

pub use algorithms::{EncryptionAlgorithm, ValidationAlgorithm};
pub use cbc::CbcHmacEncryptor;
pub use descriptor::{
    CbcHmacDescriptor, DeserializerRegistry, EncryptorDescriptor, GcmDescriptor,
};
pub use error::{ConfigurationError, CryptographicFailure};
pub use gcm::GcmEncryptor;
pub use secret::Secret;
pub use xml::{XmlElement, XmlNode};

/// Length of the random per-payload key modifier.
pub const KEY_MODIFIER_LEN: usize = 16;

/// Length of a freshly generated master secret (512 bits).
pub const MASTER_KEY_LEN: usize = 64;

/// Minimum accepted master-secret length (512 bits).
pub const MASTER_KEY_MIN_LEN: usize = 64;

/// An authenticated encryptor bound to one master secret.
///
/// Implementations are immutable after construction and safe to share
/// across threads.
pub trait AuthenticatedEncryptor: Send + Sync {
    /// Encrypt and authenticate `plaintext`, binding `aad` into the result.
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptographicFailure>;

    /// Authenticate and decrypt `protected` under the same `aad`.
    ///
    /// Every failure mode returns the same opaque error.
    fn decrypt(&self, protected: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptographicFailure>;
}
