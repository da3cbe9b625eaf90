//! In-process brute-force cosine index.
//!
//! Entries live in insertion order behind a `RwLock`; a re-upserted id keeps its original slot
//! and has its vector and text replaced. Queries score every entry and use a stable sort, so
//! ties resolve to the earlier insertion.

use super::{
    IndexEntry, IndexError, RetrievedChunk, VectorIndex, check_dimension, cosine_similarity,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Entries {
    slots: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

/// Vector index held entirely in memory.
pub struct MemoryIndex {
    dimension: usize,
    entries: RwLock<Entries>,
}

impl MemoryIndex {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Number of distinct ids stored.
    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_index(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize, IndexError> {
        for entry in &entries {
            check_dimension(self.dimension, &entry.vector)?;
        }

        let written = entries.len();
        let mut guard = self.write();
        for entry in entries {
            match guard.positions.get(&entry.id).copied() {
                Some(slot) => guard.slots[slot] = entry,
                None => {
                    let slot = guard.slots.len();
                    guard.positions.insert(entry.id.clone(), slot);
                    guard.slots.push(entry);
                }
            }
        }
        Ok(written)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        check_dimension(self.dimension, vector)?;

        let guard = self.read();
        let mut scored: Vec<(f32, &IndexEntry)> = guard
            .slots
            .iter()
            .filter(|entry| document_id.is_none_or(|id| entry.document_id == id))
            .map(|entry| (cosine_similarity(vector, &entry.vector), entry))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| RetrievedChunk {
                id: entry.id.clone(),
                score,
                text: entry.text.clone(),
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
