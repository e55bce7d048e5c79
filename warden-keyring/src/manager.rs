//! XML key manager: creates, loads and revokes key elements.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;
use warden_crypto::{ConfigurationError, DeserializerRegistry, EncryptorDescriptor, XmlElement};

use crate::error::ProtectionError;
use crate::key::Key;
use crate::options::KeyManagementOptions;
use crate::repository::XmlRepository;
use crate::xml_crypto::{
    decrypt_encrypted_subtrees, encrypt_marked_subtrees, XmlDecryptorRegistry, XmlEncryptor,
};

const KEY_ELEMENT: &str = "key";
const REVOCATION_ELEMENT: &str = "revocation";
const ELEMENT_VERSION: &str = "1";

const ID_ATTRIBUTE: &str = "id";
const VERSION_ATTRIBUTE: &str = "version";
const REVOKED_ATTRIBUTE: &str = "revoked";

const CREATION_DATE_ELEMENT: &str = "creationDate";
const ACTIVATION_DATE_ELEMENT: &str = "activationDate";
const EXPIRATION_DATE_ELEMENT: &str = "expirationDate";
const REVOCATION_DATE_ELEMENT: &str = "revocationDate";
const REASON_ELEMENT: &str = "reason";

/// Id wildcard in a revocation element: all keys created at or before the
/// revocation date.
const ALL_KEYS: &str = "*";

/// Creates and reads `<key>` / `<revocation>` elements against a pluggable
/// repository, applying at-rest XML encryption on the way out and deferring
/// decryption until a key's encryptor is first used.
pub struct XmlKeyManager {
    repository: Arc<dyn XmlRepository>,
    xml_encryptor: Arc<dyn XmlEncryptor>,
    xml_decryptors: Arc<XmlDecryptorRegistry>,
    deserializers: Arc<DeserializerRegistry>,
    options: KeyManagementOptions,
}

impl XmlKeyManager {
    /// Manager with the built-in deserializer and decryptor registries.
    pub fn new(
        repository: Arc<dyn XmlRepository>,
        xml_encryptor: Arc<dyn XmlEncryptor>,
        options: KeyManagementOptions,
    ) -> Result<Self, ConfigurationError> {
        Self::with_registries(
            repository,
            xml_encryptor,
            Arc::new(XmlDecryptorRegistry::default()),
            Arc::new(DeserializerRegistry::default()),
            options,
        )
    }

    /// Manager with caller-supplied registries (custom at-rest decryptors or
    /// descriptor formats).
    pub fn with_registries(
        repository: Arc<dyn XmlRepository>,
        xml_encryptor: Arc<dyn XmlEncryptor>,
        xml_decryptors: Arc<XmlDecryptorRegistry>,
        deserializers: Arc<DeserializerRegistry>,
        options: KeyManagementOptions,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;
        Ok(Self {
            repository,
            xml_encryptor,
            xml_decryptors,
            deserializers,
            options,
        })
    }

    pub fn options(&self) -> &KeyManagementOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // Key creation
    // -----------------------------------------------------------------------

    /// Create a key with the configured activation delay and lifetime.
    pub fn create_key(&self) -> Result<Arc<Key>, ProtectionError> {
        let now = Utc::now();
        let activation = now + self.options.new_key_activation_delay;
        self.create_new_key(activation, activation + self.options.key_lifetime)
    }

    /// Create a key with explicit activation and expiration dates.
    ///
    /// A fresh master secret is sampled, the descriptor serialized, sensitive
    /// subtrees encrypted at rest, and the element written to the repository
    /// before the key is returned.
    pub fn create_new_key(
        &self,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
    ) -> Result<Arc<Key>, ProtectionError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        // A caller may legitimately backdate activation (ring genesis uses
        // activation = the instant the rebuild started).
        let creation_date = now.min(activation_date);

        let descriptor = EncryptorDescriptor::generate(
            self.options.encryption_algorithm,
            self.options.validation_algorithm,
        )?;

        // Round the dates through their serialized form so the key object
        // handed out now is identical to what a later scan parses.
        let creation_date = canonical_timestamp(creation_date)?;
        let activation_date = canonical_timestamp(activation_date)?;
        let expiration_date = canonical_timestamp(expiration_date)?;

        let element = XmlElement::new(KEY_ELEMENT)
            .with_attribute(ID_ATTRIBUTE, id.to_string())
            .with_attribute(VERSION_ATTRIBUTE, ELEMENT_VERSION)
            .with_child(
                XmlElement::new(CREATION_DATE_ELEMENT).with_text(format_timestamp(creation_date)),
            )
            .with_child(
                XmlElement::new(ACTIVATION_DATE_ELEMENT)
                    .with_text(format_timestamp(activation_date)),
            )
            .with_child(
                XmlElement::new(EXPIRATION_DATE_ELEMENT)
                    .with_text(format_timestamp(expiration_date)),
            )
            .with_child(descriptor.export_to_xml());

        let at_rest = encrypt_marked_subtrees(&element, &*self.xml_encryptor)?;
        self.repository
            .store_element(&at_rest, &format!("key-{}", id))?;

        tracing::info!(
            key_id = %id,
            activation = %activation_date,
            expiration = %expiration_date,
            "created new key"
        );

        let key = Key::new(id, creation_date, activation_date, expiration_date, descriptor)?;
        Ok(Arc::new(key))
    }

    // -----------------------------------------------------------------------
    // Key retrieval
    // -----------------------------------------------------------------------

    /// Full repository scan: materialize every key element, apply revocation
    /// elements, and return the result.
    ///
    /// Descriptor deserialization (and at-rest decryption) is deferred until
    /// each key's encryptor is first used.
    pub fn get_all_keys(&self) -> Result<Vec<Arc<Key>>, ProtectionError> {
        let elements = self.repository.get_all_elements()?;

        let mut keys: Vec<Arc<Key>> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut revoked_ids: HashSet<Uuid> = HashSet::new();
        let mut mass_revocation: Option<DateTime<Utc>> = None;

        for element in &elements {
            match element.name() {
                KEY_ELEMENT => {
                    let key = self.parse_key_element(element)?;
                    if !seen.insert(key.id()) {
                        return Err(ConfigurationError::new(format!(
                            "repository contains key id {} more than once",
                            key.id()
                        ))
                        .into());
                    }
                    keys.push(key);
                }
                REVOCATION_ELEMENT => {
                    match parse_revocation_element(element)? {
                        Revocation::Key(id) => {
                            revoked_ids.insert(id);
                        }
                        Revocation::AllKeysCreatedBefore(cutoff) => {
                            mass_revocation = Some(match mass_revocation {
                                Some(existing) => existing.max(cutoff),
                                None => cutoff,
                            });
                        }
                    }
                }
                other => {
                    tracing::debug!(element = other, "ignoring unrecognized repository element");
                }
            }
        }

        for key in &keys {
            let mass_revoked = mass_revocation
                .map(|cutoff| cutoff >= key.creation_date())
                .unwrap_or(false);
            if revoked_ids.contains(&key.id()) || mass_revoked {
                key.set_revoked();
            }
        }

        Ok(keys)
    }

    fn parse_key_element(&self, element: &XmlElement) -> Result<Arc<Key>, ProtectionError> {
        let id = required_attribute(element, ID_ATTRIBUTE)?;
        let id = Uuid::parse_str(id)
            .map_err(|_| ConfigurationError::new(format!("key element has invalid id '{}'", id)))?;
        require_element_version(element)?;

        let creation_date = parse_timestamp(&child_text(element, CREATION_DATE_ELEMENT)?)?;
        let activation_date = parse_timestamp(&child_text(element, ACTIVATION_DATE_ELEMENT)?)?;
        let expiration_date = parse_timestamp(&child_text(element, EXPIRATION_DATE_ELEMENT)?)?;

        let descriptor_element = element
            .child(warden_crypto::descriptor::DESCRIPTOR_ELEMENT)
            .cloned()
            .ok_or_else(|| {
                ConfigurationError::new(format!("key {} has no descriptor element", id))
            })?;

        let decryptors = self.xml_decryptors.clone();
        let deserializers = self.deserializers.clone();
        let key = Key::deferred(
            id,
            creation_date,
            activation_date,
            expiration_date,
            Box::new(move || {
                let plaintext = decrypt_encrypted_subtrees(&descriptor_element, &decryptors)?;
                deserializers.import(&plaintext).map_err(ProtectionError::from)
            }),
        )?;

        if element.attribute(REVOKED_ATTRIBUTE) == Some("true") {
            key.set_revoked();
        }

        Ok(Arc::new(key))
    }

    // -----------------------------------------------------------------------
    // Revocation
    // -----------------------------------------------------------------------

    /// Persist a revocation of one key.
    pub fn revoke_key(&self, id: Uuid, reason: Option<&str>) -> Result<(), ProtectionError> {
        self.store_revocation(&id.to_string(), reason)?;
        tracing::warn!(key_id = %id, "revoked key");
        Ok(())
    }

    /// Persist a mass revocation of every key created at or before `cutoff`.
    pub fn revoke_all_keys(
        &self,
        cutoff: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<(), ProtectionError> {
        self.store_revocation_dated(ALL_KEYS, canonical_timestamp(cutoff)?, reason)?;
        tracing::warn!(cutoff = %cutoff, "revoked all keys created at or before cutoff");
        Ok(())
    }

    fn store_revocation(&self, key_id: &str, reason: Option<&str>) -> Result<(), ProtectionError> {
        self.store_revocation_dated(key_id, canonical_timestamp(Utc::now())?, reason)
    }

    fn store_revocation_dated(
        &self,
        key_id: &str,
        revocation_date: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<(), ProtectionError> {
        let mut element = XmlElement::new(REVOCATION_ELEMENT)
            .with_attribute(VERSION_ATTRIBUTE, ELEMENT_VERSION)
            .with_child(
                XmlElement::new(REVOCATION_DATE_ELEMENT)
                    .with_text(format_timestamp(revocation_date)),
            )
            .with_child(XmlElement::new(KEY_ELEMENT).with_attribute(ID_ATTRIBUTE, key_id));
        if let Some(reason) = reason {
            element.add_child(XmlElement::new(REASON_ELEMENT).with_text(reason));
        }

        self.repository
            .store_element(&element, &format!("revocation-{}", Uuid::new_v4()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Element parsing helpers
// ---------------------------------------------------------------------------

enum Revocation {
    Key(Uuid),
    AllKeysCreatedBefore(DateTime<Utc>),
}

fn parse_revocation_element(element: &XmlElement) -> Result<Revocation, ProtectionError> {
    require_element_version(element)?;
    let revocation_date = parse_timestamp(&child_text(element, REVOCATION_DATE_ELEMENT)?)?;
    let target = element
        .child(KEY_ELEMENT)
        .and_then(|key| key.attribute(ID_ATTRIBUTE))
        .ok_or_else(|| ConfigurationError::new("revocation element names no key"))?;

    if target == ALL_KEYS {
        Ok(Revocation::AllKeysCreatedBefore(revocation_date))
    } else {
        // A targeted revocation applies to the named key unconditionally;
        // the date is informational.
        let id = Uuid::parse_str(target).map_err(|_| {
            ConfigurationError::new(format!("revocation names invalid key id '{}'", target))
        })?;
        Ok(Revocation::Key(id))
    }
}

fn require_element_version(element: &XmlElement) -> Result<(), ConfigurationError> {
    match element.attribute(VERSION_ATTRIBUTE) {
        Some(ELEMENT_VERSION) => Ok(()),
        Some(other) => Err(ConfigurationError::new(format!(
            "unsupported {} element version '{}'",
            element.name(),
            other
        ))),
        None => Err(ConfigurationError::new(format!(
            "{} element has no version attribute",
            element.name()
        ))),
    }
}

fn required_attribute<'a>(
    element: &'a XmlElement,
    name: &str,
) -> Result<&'a str, ConfigurationError> {
    element.attribute(name).ok_or_else(|| {
        ConfigurationError::new(format!(
            "{} element has no {} attribute",
            element.name(),
            name
        ))
    })
}

fn child_text(element: &XmlElement, name: &str) -> Result<String, ConfigurationError> {
    element.child(name).map(|child| child.text()).ok_or_else(|| {
        ConfigurationError::new(format!(
            "{} element has no <{}> child",
            element.name(),
            name
        ))
    })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, ConfigurationError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ConfigurationError::new(format!("invalid timestamp '{}'", text)))
}

/// Truncate to the precision the serialized form carries, so in-memory and
/// parsed-back keys compare equal.
fn canonical_timestamp(timestamp: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigurationError> {
    parse_timestamp(&format_timestamp(timestamp))
}
