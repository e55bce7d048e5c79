//! Secret container: owns sensitive bytes, zeroes them on release.

use core::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::error::{ConfigurationError, CryptographicFailure};
use crate::rand;

/// An owned buffer of sensitive bytes.
///
/// The backing storage is overwritten with zeros when the container is
/// dropped. Contents are read either into a caller-supplied buffer of the
/// exact same length ([`Secret::write_into`]) or in place through the scoped
/// accessor ([`Secret::with_bytes`]) so key material is never copied around
/// casually. The `Debug` impl never prints the bytes.
pub struct Secret {
    bytes: Zeroizing<Vec<u8>>,
}

impl Secret {
    /// Sample `len` fresh random bytes from the platform RNG.
    pub fn random(len: usize) -> Result<Self, CryptographicFailure> {
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        rand::fill(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Import existing bytes. The caller keeps responsibility for wiping
    /// its own copy.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        }
    }

    /// Import from standard base64, as stored in descriptor XML.
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigurationError> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| ConfigurationError::new("master secret is not valid base64"))?;
        let secret = Self {
            bytes: Zeroizing::new(decoded),
        };
        Ok(secret)
    }

    /// Export as standard base64 for descriptor serialization. The caller
    /// must route the result through an at-rest XML encryptor before it is
    /// persisted anywhere.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&*self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy the secret into `dest`. Fails unless `dest.len() == self.len()`.
    pub fn write_into(&self, dest: &mut [u8]) -> Result<(), CryptographicFailure> {
        if dest.len() != self.bytes.len() {
            return Err(CryptographicFailure);
        }
        dest.copy_from_slice(&self.bytes);
        Ok(())
    }

    /// Run `f` over the secret bytes in place.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the bytes.
        write!(f, "Secret({} bytes)", self.bytes.len())
    }
}
