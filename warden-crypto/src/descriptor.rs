//! Encryptor descriptors: the durable configuration of an encryptor.
//!
//! A descriptor is algorithms + master secret. It exports to an XML element
//! tagged with the fully-qualified name of its deserializer, and the reader
//! dispatches through a closed registry keyed on that tag. The registry is
//! the only dispatch mechanism; there is no reflection and unknown tags are
//! rejected.

use std::collections::HashMap;
use std::sync::Arc;

use crate::algorithms::{EncryptionAlgorithm, ValidationAlgorithm};
use crate::cbc::CbcHmacEncryptor;
use crate::error::{ConfigurationError, CryptographicFailure};
use crate::gcm::GcmEncryptor;
use crate::secret::Secret;
use crate::xml::XmlElement;
use crate::{AuthenticatedEncryptor, MASTER_KEY_LEN};

/// Deserializer tag for the CBC-then-HMAC variant. Persisted; never change.
pub const CBC_HMAC_DESERIALIZER_TYPE: &str =
    "warden_crypto::descriptor::CbcHmacDescriptorDeserializer";

/// Deserializer tag for the GCM variant. Persisted; never change.
pub const GCM_DESERIALIZER_TYPE: &str = "warden_crypto::descriptor::GcmDescriptorDeserializer";

/// Name of the exported descriptor element.
pub const DESCRIPTOR_ELEMENT: &str = "descriptor";

/// Attribute carrying the deserializer tag.
pub const DESERIALIZER_TYPE_ATTRIBUTE: &str = "deserializerType";

/// Well-known marker: any element carrying this attribute with value "true"
/// holds secret material and must pass through an at-rest XML encryptor
/// before persisting.
pub const REQUIRES_ENCRYPTION_ATTRIBUTE: &str = "requiresEncryption";

const ENCRYPTION_ELEMENT: &str = "encryption";
const VALIDATION_ELEMENT: &str = "validation";
const MASTER_KEY_ELEMENT: &str = "masterKey";
const VALUE_ELEMENT: &str = "value";
const ALGORITHM_ATTRIBUTE: &str = "algorithm";

// ---------------------------------------------------------------------------
// Descriptor variants
// ---------------------------------------------------------------------------

/// Configuration of a CBC-then-HMAC encryptor.
pub struct CbcHmacDescriptor {
    encryption: EncryptionAlgorithm,
    validation: ValidationAlgorithm,
    master: Arc<Secret>,
}

impl CbcHmacDescriptor {
    pub fn new(
        encryption: EncryptionAlgorithm,
        validation: ValidationAlgorithm,
        master: Arc<Secret>,
    ) -> Result<Self, ConfigurationError> {
        // Constructing the encryptor performs the full validation.
        CbcHmacEncryptor::new(encryption, validation, master.clone())?;
        Ok(Self {
            encryption,
            validation,
            master,
        })
    }

    pub fn encryption(&self) -> EncryptionAlgorithm {
        self.encryption
    }

    pub fn validation(&self) -> ValidationAlgorithm {
        self.validation
    }
}

/// Configuration of a GCM encryptor.
pub struct GcmDescriptor {
    encryption: EncryptionAlgorithm,
    master: Arc<Secret>,
}

impl GcmDescriptor {
    pub fn new(
        encryption: EncryptionAlgorithm,
        master: Arc<Secret>,
    ) -> Result<Self, ConfigurationError> {
        GcmEncryptor::new(encryption, master.clone())?;
        Ok(Self { encryption, master })
    }

    pub fn encryption(&self) -> EncryptionAlgorithm {
        self.encryption
    }
}

/// A descriptor for either encryptor variant.
pub enum EncryptorDescriptor {
    CbcHmac(CbcHmacDescriptor),
    Gcm(GcmDescriptor),
}

impl EncryptorDescriptor {
    /// Create a descriptor with a fresh random master secret.
    ///
    /// `validation` is ignored for GCM algorithms, which carry their own
    /// integrity check.
    pub fn generate(
        encryption: EncryptionAlgorithm,
        validation: ValidationAlgorithm,
    ) -> Result<Self, CryptographicFailure> {
        let master = Arc::new(Secret::random(MASTER_KEY_LEN)?);
        let descriptor = if encryption.is_gcm() {
            GcmDescriptor::new(encryption, master).map(EncryptorDescriptor::Gcm)
        } else {
            CbcHmacDescriptor::new(encryption, validation, master).map(EncryptorDescriptor::CbcHmac)
        };
        // A generated descriptor only fails construction if the RNG failed.
        descriptor.map_err(|_| CryptographicFailure)
    }

    pub fn encryption(&self) -> EncryptionAlgorithm {
        match self {
            EncryptorDescriptor::CbcHmac(d) => d.encryption,
            EncryptorDescriptor::Gcm(d) => d.encryption,
        }
    }

    /// Tag stored in the exported XML so the reader can dispatch.
    pub fn deserializer_type(&self) -> &'static str {
        match self {
            EncryptorDescriptor::CbcHmac(_) => CBC_HMAC_DESERIALIZER_TYPE,
            EncryptorDescriptor::Gcm(_) => GCM_DESERIALIZER_TYPE,
        }
    }

    /// Build the runtime encryptor for this configuration.
    pub fn build_encryptor(
        &self,
    ) -> Result<Arc<dyn AuthenticatedEncryptor>, ConfigurationError> {
        match self {
            EncryptorDescriptor::CbcHmac(d) => Ok(Arc::new(CbcHmacEncryptor::new(
                d.encryption,
                d.validation,
                d.master.clone(),
            )?)),
            EncryptorDescriptor::Gcm(d) => {
                Ok(Arc::new(GcmEncryptor::new(d.encryption, d.master.clone())?))
            }
        }
    }

    /// Export to XML. The master secret is base64 inside an element marked
    /// `requiresEncryption="true"`; the caller must route that subtree
    /// through an at-rest encryptor before the element leaves the process.
    pub fn export_to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new(DESCRIPTOR_ELEMENT)
            .with_attribute(DESERIALIZER_TYPE_ATTRIBUTE, self.deserializer_type());

        let (master, validation) = match self {
            EncryptorDescriptor::CbcHmac(d) => (&d.master, Some(d.validation)),
            EncryptorDescriptor::Gcm(d) => (&d.master, None),
        };

        element.add_child(
            XmlElement::new(ENCRYPTION_ELEMENT)
                .with_attribute(ALGORITHM_ATTRIBUTE, self.encryption().name()),
        );
        if let Some(validation) = validation {
            element.add_child(
                XmlElement::new(VALIDATION_ELEMENT)
                    .with_attribute(ALGORITHM_ATTRIBUTE, validation.name()),
            );
        }
        element.add_child(
            XmlElement::new(MASTER_KEY_ELEMENT)
                .with_attribute(REQUIRES_ENCRYPTION_ATTRIBUTE, "true")
                .with_child(XmlElement::new(VALUE_ELEMENT).with_text(master.to_base64())),
        );
        element
    }
}

// ---------------------------------------------------------------------------
// Deserializers (pure: XML in, descriptor out)
// ---------------------------------------------------------------------------

fn algorithm_attribute<'a>(
    element: &'a XmlElement,
    child_name: &str,
) -> Result<&'a str, ConfigurationError> {
    element
        .child(child_name)
        .and_then(|child| child.attribute(ALGORITHM_ATTRIBUTE))
        .ok_or_else(|| {
            ConfigurationError::new(format!(
                "descriptor is missing <{} algorithm=\"…\">",
                child_name
            ))
        })
}

fn master_secret(element: &XmlElement) -> Result<Arc<Secret>, ConfigurationError> {
    let value = element
        .child(MASTER_KEY_ELEMENT)
        .and_then(|master| master.child(VALUE_ELEMENT))
        .ok_or_else(|| ConfigurationError::new("descriptor is missing the master key value"))?;
    Ok(Arc::new(Secret::from_base64(&value.text())?))
}

fn import_cbc_hmac(element: &XmlElement) -> Result<EncryptorDescriptor, ConfigurationError> {
    let encryption = EncryptionAlgorithm::from_name(algorithm_attribute(element, ENCRYPTION_ELEMENT)?)?;
    let validation = ValidationAlgorithm::from_name(algorithm_attribute(element, VALIDATION_ELEMENT)?)?;
    let master = master_secret(element)?;
    CbcHmacDescriptor::new(encryption, validation, master).map(EncryptorDescriptor::CbcHmac)
}

fn import_gcm(element: &XmlElement) -> Result<EncryptorDescriptor, ConfigurationError> {
    let encryption = EncryptionAlgorithm::from_name(algorithm_attribute(element, ENCRYPTION_ELEMENT)?)?;
    let master = master_secret(element)?;
    GcmDescriptor::new(encryption, master).map(EncryptorDescriptor::Gcm)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A deserializer entry: pure function from XML to descriptor.
pub type DeserializerFn = fn(&XmlElement) -> Result<EncryptorDescriptor, ConfigurationError>;

/// Closed map from deserializer tag to deserializer.
///
/// `Default` registers both built-in variants; embedders with custom
/// descriptor formats can register additional tags.
pub struct DeserializerRegistry {
    entries: HashMap<String, DeserializerFn>,
}

impl DeserializerRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, deserializer: DeserializerFn) {
        self.entries.insert(tag.into(), deserializer);
    }

    pub fn resolve(&self, tag: &str) -> Result<DeserializerFn, ConfigurationError> {
        self.entries.get(tag).copied().ok_or_else(|| {
            ConfigurationError::new(format!("no descriptor deserializer registered for '{}'", tag))
        })
    }

    /// Dispatch on the element's `deserializerType` attribute.
    pub fn import(&self, element: &XmlElement) -> Result<EncryptorDescriptor, ConfigurationError> {
        let tag = element.attribute(DESERIALIZER_TYPE_ATTRIBUTE).ok_or_else(|| {
            ConfigurationError::new("descriptor element has no deserializerType attribute")
        })?;
        self.resolve(tag)?(element)
    }
}

impl Default for DeserializerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CBC_HMAC_DESERIALIZER_TYPE, import_cbc_hmac);
        registry.register(GCM_DESERIALIZER_TYPE, import_gcm);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> Arc<Secret> {
        Arc::new(Secret::from_bytes(&[0x6B; 64]))
    }

    #[test]
    fn cbc_descriptor_xml_shape() {
        let descriptor = EncryptorDescriptor::CbcHmac(
            CbcHmacDescriptor::new(
                EncryptionAlgorithm::Aes256Cbc,
                ValidationAlgorithm::HmacSha512,
                master(),
            )
            .unwrap(),
        );
        let expected = format!(
            "<descriptor deserializerType=\"{}\">\
             <encryption algorithm=\"AES_256_CBC\"></encryption>\
             <validation algorithm=\"HMACSHA512\"></validation>\
             <masterKey requiresEncryption=\"true\"><value>{}</value></masterKey>\
             </descriptor>",
            CBC_HMAC_DESERIALIZER_TYPE,
            master().to_base64(),
        );
        assert_eq!(descriptor.export_to_xml().to_xml_string().unwrap(), expected);
    }

    #[test]
    fn gcm_descriptor_omits_validation() {
        let descriptor = EncryptorDescriptor::Gcm(
            GcmDescriptor::new(EncryptionAlgorithm::Aes128Gcm, master()).unwrap(),
        );
        let xml = descriptor.export_to_xml();
        assert!(xml.child(VALIDATION_ELEMENT).is_none());
        assert_eq!(
            xml.child(ENCRYPTION_ELEMENT).unwrap().attribute(ALGORITHM_ATTRIBUTE),
            Some("AES_128_GCM")
        );
    }

    #[test]
    fn export_import_round_trip_every_variant() {
        let registry = DeserializerRegistry::default();

        for encryption in EncryptionAlgorithm::ALL {
            for validation in ValidationAlgorithm::ALL {
                let descriptor = EncryptorDescriptor::generate(encryption, validation).unwrap();
                let restored = registry.import(&descriptor.export_to_xml()).unwrap();
                assert_eq!(restored.encryption(), encryption);
                assert_eq!(restored.deserializer_type(), descriptor.deserializer_type());

                // The two descriptors must be interchangeable at runtime.
                let a = descriptor.build_encryptor().unwrap();
                let b = restored.build_encryptor().unwrap();
                let protected = a.encrypt(b"payload", b"aad").unwrap();
                assert_eq!(b.decrypt(&protected, b"aad").unwrap(), b"payload");
            }
        }
    }

    #[test]
    fn unknown_deserializer_tag_is_rejected() {
        let registry = DeserializerRegistry::default();
        let element = XmlElement::new(DESCRIPTOR_ELEMENT)
            .with_attribute(DESERIALIZER_TYPE_ATTRIBUTE, "com.example.Unknown");
        assert!(registry.import(&element).is_err());
    }

    #[test]
    fn missing_master_key_is_rejected() {
        let registry = DeserializerRegistry::default();
        let element = XmlElement::new(DESCRIPTOR_ELEMENT)
            .with_attribute(DESERIALIZER_TYPE_ATTRIBUTE, GCM_DESERIALIZER_TYPE)
            .with_child(
                XmlElement::new(ENCRYPTION_ELEMENT).with_attribute(ALGORITHM_ATTRIBUTE, "AES_256_GCM"),
            );
        assert!(registry.import(&element).is_err());
    }

    #[test]
    fn short_master_secret_is_rejected() {
        let short = Arc::new(Secret::from_bytes(&[0u8; 16]));
        assert!(CbcHmacDescriptor::new(
            EncryptionAlgorithm::Aes256Cbc,
            ValidationAlgorithm::HmacSha256,
            short.clone(),
        )
        .is_err());
        assert!(GcmDescriptor::new(EncryptionAlgorithm::Aes256Gcm, short).is_err());
    }
}
