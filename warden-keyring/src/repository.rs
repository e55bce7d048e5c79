//! Repositories: where key-ring XML elements live.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use warden_crypto::XmlElement;

use crate::error::RepositoryError;

// ---------------------------------------------------------------------------
// Repository trait
// ---------------------------------------------------------------------------

/// Backend for persisting key-ring XML elements.
///
/// Implement this for your infrastructure:
/// - InMemoryRepository (testing)
/// - FileRepository (single machine)
/// - Your database or blob store (production)
///
/// Every read is a full scan; the key-ring provider caches the result.
pub trait XmlRepository: Send + Sync {
    fn get_all_elements(&self) -> Result<Vec<XmlElement>, RepositoryError>;
    fn store_element(&self, element: &XmlElement, friendly_name: &str)
        -> Result<(), RepositoryError>;
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// In-memory storage (for testing and ephemeral use).
pub struct InMemoryRepository {
    elements: RwLock<Vec<(String, XmlElement)>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            elements: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlRepository for InMemoryRepository {
    fn get_all_elements(&self) -> Result<Vec<XmlElement>, RepositoryError> {
        let elements = self.elements.read().unwrap();
        Ok(elements.iter().map(|(_, element)| element.clone()).collect())
    }

    fn store_element(
        &self,
        element: &XmlElement,
        friendly_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut elements = self.elements.write().unwrap();
        elements.push((friendly_name.to_string(), element.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File repository
// ---------------------------------------------------------------------------

/// File-based storage (one XML file per element).
///
/// Directory layout:
/// ```text
/// keys/
///   {friendly_name}.xml
/// ```
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| RepositoryError::new(format!("create dir: {}", e)))?;
        Ok(Self { dir })
    }

    fn element_path(&self, friendly_name: &str) -> Result<PathBuf, RepositoryError> {
        let valid = !friendly_name.is_empty()
            && friendly_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(RepositoryError::new(format!(
                "invalid friendly name '{}'",
                friendly_name
            )));
        }
        Ok(self.dir.join(format!("{}.xml", friendly_name)))
    }

    fn read_element_file(&self, path: &Path) -> Result<XmlElement, RepositoryError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| RepositoryError::new(format!("read: {}", e)))?;
        XmlElement::parse(&data)
            .map_err(|e| RepositoryError::new(format!("parse {}: {}", path.display(), e)))
    }
}

impl XmlRepository for FileRepository {
    fn get_all_elements(&self) -> Result<Vec<XmlElement>, RepositoryError> {
        let mut paths = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| RepositoryError::new(format!("readdir: {}", e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::new(format!("entry: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("xml") {
                paths.push(path);
            }
        }
        // Deterministic order regardless of directory enumeration.
        paths.sort();

        let mut elements = Vec::with_capacity(paths.len());
        for path in &paths {
            elements.push(self.read_element_file(path)?);
        }
        Ok(elements)
    }

    fn store_element(
        &self,
        element: &XmlElement,
        friendly_name: &str,
    ) -> Result<(), RepositoryError> {
        let path = self.element_path(friendly_name)?;
        let xml = element
            .to_xml_string()
            .map_err(|e| RepositoryError::new(format!("serialize: {}", e)))?;
        // Atomic write: write to temp, then rename.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &xml).map_err(|e| RepositoryError::new(format!("write: {}", e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| RepositoryError::new(format!("rename: {}", e)))?;
        Ok(())
    }
}
