//! At-rest XML encryption: pluggable encryptors and decryptors for the
//! sensitive subtrees of persisted key elements.
//!
//! Immediately after serialization the key manager replaces every subtree
//! marked `requiresEncryption="true"` with
//! `<encryptedSecret decryptorType="FQN">…</encryptedSecret>`; on read the
//! decryptor named by the wrapper reverses the substitution before the
//! descriptor deserializer runs.

use std::collections::HashMap;
use std::sync::Arc;

use warden_crypto::descriptor::REQUIRES_ENCRYPTION_ATTRIBUTE;
use warden_crypto::{ConfigurationError, XmlElement, XmlNode};

use crate::error::ProtectionError;

/// Wrapper element holding an encrypted subtree.
pub const ENCRYPTED_SECRET_ELEMENT: &str = "encryptedSecret";

/// Attribute naming the decryptor able to reverse the wrapper's contents.
pub const DECRYPTOR_TYPE_ATTRIBUTE: &str = "decryptorType";

/// Decryptor tag for the null (development) pair. Persisted; never change.
pub const NULL_XML_DECRYPTOR_TYPE: &str = "warden_keyring::xml_crypto::NullXmlDecryptor";

/// Output of an [`XmlEncryptor`]: the encrypted element plus the tag of the
/// decryptor that can reverse it.
pub struct EncryptedXmlInfo {
    pub element: XmlElement,
    pub decryptor_type: String,
}

/// Encrypts one plaintext subtree for persistence at rest.
///
/// Implement this over DPAPI, a certificate, a KMS — whatever the host
/// platform offers. The null implementation below is for development only.
pub trait XmlEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &XmlElement) -> Result<EncryptedXmlInfo, ProtectionError>;
}

/// Reverses an [`XmlEncryptor`]. Receives the element *inside* the
/// `<encryptedSecret>` wrapper.
pub trait XmlDecryptor: Send + Sync {
    fn decrypt(&self, encrypted: &XmlElement) -> Result<XmlElement, ProtectionError>;
}

// ---------------------------------------------------------------------------
// Null implementations (no protection at rest)
// ---------------------------------------------------------------------------

/// Passes the subtree through unchanged, wrapped in `<unencryptedKey>`.
pub struct NullXmlEncryptor;

impl XmlEncryptor for NullXmlEncryptor {
    fn encrypt(&self, plaintext: &XmlElement) -> Result<EncryptedXmlInfo, ProtectionError> {
        tracing::warn!("persisting key material without encryption at rest");
        Ok(EncryptedXmlInfo {
            element: XmlElement::new("unencryptedKey").with_child(plaintext.clone()),
            decryptor_type: NULL_XML_DECRYPTOR_TYPE.to_string(),
        })
    }
}

/// Unwraps `<unencryptedKey>`.
pub struct NullXmlDecryptor;

impl XmlDecryptor for NullXmlDecryptor {
    fn decrypt(&self, encrypted: &XmlElement) -> Result<XmlElement, ProtectionError> {
        if encrypted.name() != "unencryptedKey" {
            return Err(ConfigurationError::new(format!(
                "expected <unencryptedKey>, found <{}>",
                encrypted.name()
            ))
            .into());
        }
        encrypted
            .child_elements()
            .next()
            .cloned()
            .ok_or_else(|| ConfigurationError::new("<unencryptedKey> wrapper is empty").into())
    }
}

// ---------------------------------------------------------------------------
// Decryptor registry
// ---------------------------------------------------------------------------

/// Closed map from decryptor tag to decryptor instance.
pub struct XmlDecryptorRegistry {
    entries: HashMap<String, Arc<dyn XmlDecryptor>>,
}

impl XmlDecryptorRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, decryptor: Arc<dyn XmlDecryptor>) {
        self.entries.insert(tag.into(), decryptor);
    }

    pub fn resolve(&self, tag: &str) -> Result<&Arc<dyn XmlDecryptor>, ConfigurationError> {
        self.entries.get(tag).ok_or_else(|| {
            ConfigurationError::new(format!("no XML decryptor registered for '{}'", tag))
        })
    }
}

impl Default for XmlDecryptorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(NULL_XML_DECRYPTOR_TYPE, Arc::new(NullXmlDecryptor));
        registry
    }
}

// ---------------------------------------------------------------------------
// Subtree substitution
// ---------------------------------------------------------------------------

fn is_marked(element: &XmlElement) -> bool {
    element.attribute(REQUIRES_ENCRYPTION_ATTRIBUTE) == Some("true")
}

/// Replace every subtree marked `requiresEncryption="true"` with the
/// encryptor's wrapped output. Must run before any element is persisted.
pub fn encrypt_marked_subtrees(
    element: &XmlElement,
    encryptor: &dyn XmlEncryptor,
) -> Result<XmlElement, ProtectionError> {
    if is_marked(element) {
        let info = encryptor.encrypt(element)?;
        return Ok(XmlElement::new(ENCRYPTED_SECRET_ELEMENT)
            .with_attribute(DECRYPTOR_TYPE_ATTRIBUTE, info.decryptor_type)
            .with_child(info.element));
    }

    let mut out = XmlElement::new(element.name());
    for (name, value) in element.attributes() {
        out.set_attribute(name, value);
    }
    for node in element.nodes() {
        match node {
            XmlNode::Element(child) => out.add_child(encrypt_marked_subtrees(child, encryptor)?),
            XmlNode::Text(text) => out.nodes_mut().push(XmlNode::Text(text.clone())),
        }
    }
    Ok(out)
}

/// Reverse [`encrypt_marked_subtrees`]: replace every `<encryptedSecret>`
/// wrapper with its decrypted plaintext subtree.
pub fn decrypt_encrypted_subtrees(
    element: &XmlElement,
    registry: &XmlDecryptorRegistry,
) -> Result<XmlElement, ProtectionError> {
    if element.name() == ENCRYPTED_SECRET_ELEMENT {
        let tag = element.attribute(DECRYPTOR_TYPE_ATTRIBUTE).ok_or_else(|| {
            ConfigurationError::new("<encryptedSecret> has no decryptorType attribute")
        })?;
        let decryptor = registry.resolve(tag)?;
        let inner = element.child_elements().next().ok_or_else(|| {
            ConfigurationError::new("<encryptedSecret> wrapper is empty")
        })?;
        return decryptor.decrypt(inner);
    }

    let mut out = XmlElement::new(element.name());
    for (name, value) in element.attributes() {
        out.set_attribute(name, value);
    }
    for node in element.nodes() {
        match node {
            XmlNode::Element(child) => {
                out.add_child(decrypt_encrypted_subtrees(child, registry)?)
            }
            XmlNode::Text(text) => out.nodes_mut().push(XmlNode::Text(text.clone())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked_tree() -> XmlElement {
        XmlElement::new("key").with_attribute("id", "k1").with_child(
            XmlElement::new("descriptor").with_child(
                XmlElement::new("masterKey")
                    .with_attribute(REQUIRES_ENCRYPTION_ATTRIBUTE, "true")
                    .with_child(XmlElement::new("value").with_text("c2VjcmV0")),
            ),
        )
    }

    #[test]
    fn marked_subtree_is_wrapped() {
        let encrypted = encrypt_marked_subtrees(&marked_tree(), &NullXmlEncryptor).unwrap();
        let wrapper = encrypted
            .child("descriptor")
            .unwrap()
            .child(ENCRYPTED_SECRET_ELEMENT)
            .unwrap();
        assert_eq!(
            wrapper.attribute(DECRYPTOR_TYPE_ATTRIBUTE),
            Some(NULL_XML_DECRYPTOR_TYPE)
        );
        // The plaintext master key no longer appears outside the wrapper.
        assert!(encrypted.child("descriptor").unwrap().child("masterKey").is_none());
        assert!(wrapper.child("unencryptedKey").unwrap().child("masterKey").is_some());
    }

    #[test]
    fn encrypt_decrypt_restores_original_tree() {
        let original = marked_tree();
        let encrypted = encrypt_marked_subtrees(&original, &NullXmlEncryptor).unwrap();
        let decrypted =
            decrypt_encrypted_subtrees(&encrypted, &XmlDecryptorRegistry::default()).unwrap();
        assert_eq!(decrypted, original);
    }

    #[test]
    fn unmarked_trees_pass_through_unchanged() {
        let plain = XmlElement::new("revocation")
            .with_child(XmlElement::new("reason").with_text("compromised"));
        let encrypted = encrypt_marked_subtrees(&plain, &NullXmlEncryptor).unwrap();
        assert_eq!(encrypted, plain);
        let decrypted =
            decrypt_encrypted_subtrees(&plain, &XmlDecryptorRegistry::default()).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn unknown_decryptor_tag_is_rejected() {
        let wrapper = XmlElement::new(ENCRYPTED_SECRET_ELEMENT)
            .with_attribute(DECRYPTOR_TYPE_ATTRIBUTE, "com.example.Dpapi")
            .with_child(XmlElement::new("blob"));
        let result = decrypt_encrypted_subtrees(&wrapper, &XmlDecryptorRegistry::default());
        assert!(matches!(result, Err(ProtectionError::Configuration(_))));
    }

    #[test]
    fn null_decryptor_requires_its_own_wrapper() {
        let foreign = XmlElement::new("dpapiBlob");
        assert!(NullXmlDecryptor.decrypt(&foreign).is_err());
    }
}
