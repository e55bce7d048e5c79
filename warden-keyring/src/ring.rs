//! An immutable key-ring snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::key::Key;

/// All known keys plus the designated default, frozen at one instant.
///
/// Rings are never mutated; each refresh publishes a fresh ring and readers
/// keep whatever `Arc` they already hold.
pub struct KeyRing {
    default_key: Arc<Key>,
    keys: HashMap<Uuid, Arc<Key>>,
    created_at: DateTime<Utc>,
}

impl KeyRing {
    /// Build a snapshot. The default key is inserted into the lookup table
    /// whether or not it appears in `keys`.
    pub fn new(
        default_key: Arc<Key>,
        keys: impl IntoIterator<Item = Arc<Key>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut table: HashMap<Uuid, Arc<Key>> =
            keys.into_iter().map(|key| (key.id(), key)).collect();
        table.insert(default_key.id(), default_key.clone());
        Self {
            default_key,
            keys: table,
            created_at,
        }
    }

    /// The key new payloads are protected with.
    pub fn default_key(&self) -> &Arc<Key> {
        &self.default_key
    }

    /// Look up a key by id (the unprotect path).
    pub fn key(&self, id: &Uuid) -> Option<&Arc<Key>> {
        self.keys.get(id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.keys.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
