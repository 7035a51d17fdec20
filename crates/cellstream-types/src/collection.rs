//! Per-cell feature collections and the pending writes built from them.
//!
//! The store never enforces id uniqueness; [`CellCollection::merged_with`]
//! is the only place new entries enter a collection, and it drops any
//! existing entry with the same id before appending.

use serde::{Deserialize, Serialize};

use crate::feature::FeatureEntry;
use crate::ids::{CellToken, FeatureId};

/// All features stored under one cell token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellCollection {
    /// Entries in write order; the most recently merged entry is last.
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
}

impl CellCollection {
    /// An empty collection.
    pub const fn new() -> Self {
        Self {
            features: Vec::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the collection holds no entries.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Look up the entry for a feature id.
    pub fn get(&self, id: &FeatureId) -> Option<&FeatureEntry> {
        self.features.iter().find(|e| &e.id == id)
    }

    /// Feature ids in stored order.
    pub fn ids(&self) -> impl Iterator<Item = &FeatureId> {
        self.features.iter().map(|e| &e.id)
    }

    /// Upsert-by-id: copy every entry whose id differs from `entry.id`, then
    /// append `entry`.
    pub fn merged_with(&self, entry: FeatureEntry) -> Self {
        let mut features: Vec<FeatureEntry> = self
            .features
            .iter()
            .filter(|existing| existing.id != entry.id)
            .cloned()
            .collect();
        features.push(entry);
        Self { features }
    }

    /// Decode a stored collection.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if the bytes are not a valid
    /// collection document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode the collection for storage.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Order-insensitive equality of the entry sets.
    pub fn same_entries(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .features
                .iter()
                .all(|e| other.get(&e.id).is_some_and(|o| o == e))
    }
}

/// A pending mutation: the fully re-serialized collection for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Store key.
    pub token: CellToken,
    /// Serialized [`CellCollection`].
    pub value: Vec<u8>,
}
