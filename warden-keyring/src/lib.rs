//! # Warden Keyring
//!
//! Key-ring management and purpose-scoped protectors.
//!
//! Provides a versioned ring of rotating keys persisted as XML elements,
//! at-rest encryption of key material, deterministic default-key selection,
//! and the protect/unprotect entry points application code uses.
//!
//! Built on top of `warden-crypto` for the authenticated encryptors.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_keyring::{
//!     DataProtectionProvider, InMemoryRepository, KeyManagementOptions, KeyRingProvider,
//!     NullXmlEncryptor, XmlKeyManager,
//! };
//!
//! let manager = XmlKeyManager::new(
//!     Arc::new(InMemoryRepository::new()),
//!     Arc::new(NullXmlEncryptor), // development only
//!     KeyManagementOptions::default(),
//! )?;
//! let provider = DataProtectionProvider::new(Arc::new(KeyRingProvider::new(Arc::new(manager))));
//!
//! let protector = provider.create_protector("app.auth")?;
//! let payload = protector.protect(b"secret")?;
//! assert_eq!(protector.unprotect(&payload)?, b"secret");
//! ```

pub mod aad;
pub mod error;
pub mod key;
pub mod manager;
pub mod options;
pub mod protector;
pub mod provider;
pub mod repository;
pub mod resolver;
pub mod ring;
pub mod xml_crypto;

// Re-export main types for convenience
pub use error::{ProtectionError, RepositoryError};
pub use key::Key;
pub use manager::XmlKeyManager;
pub use options::KeyManagementOptions;
pub use protector::{DataProtectionProvider, DataProtector, UnprotectOptions, UnprotectStatus};
pub use provider::KeyRingProvider;
pub use repository::{FileRepository, InMemoryRepository, XmlRepository};
pub use resolver::{DefaultKeyResolution, DefaultKeyResolver};
pub use ring::KeyRing;
pub use xml_crypto::{
    EncryptedXmlInfo, NullXmlDecryptor, NullXmlEncryptor, XmlDecryptor, XmlDecryptorRegistry,
    XmlEncryptor,
};
