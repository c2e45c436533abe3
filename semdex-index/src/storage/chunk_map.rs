//! Label bookkeeping persisted next to each ANN graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// What a label in the graph refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    pub text: String,
    pub source_file: String,
    pub chunk_hash: String,
}

/// `label → chunk`, serialized as `{ "<label>": { text, sourceFile, chunkHash } }`.
///
/// A chunk hash appears at most once. Labels of soft-deleted vectors are
/// simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkMap {
    entries: BTreeMap<u64, ChunkEntry>,
}

impl ChunkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: u64) -> Option<&ChunkEntry> {
        self.entries.get(&label)
    }

    pub fn insert(&mut self, label: u64, entry: ChunkEntry) -> Option<ChunkEntry> {
        self.entries.insert(label, entry)
    }

    pub fn remove(&mut self, label: u64) -> Option<ChunkEntry> {
        self.entries.remove(&label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &ChunkEntry)> {
        self.entries.iter().map(|(label, entry)| (*label, entry))
    }

    /// Every chunk hash currently indexed.
    pub fn hashes(&self) -> HashSet<&str> {
        self.entries.values().map(|e| e.chunk_hash.as_str()).collect()
    }

    /// Smallest label greater than every label in the map.
    pub fn next_free_label(&self) -> u64 {
        self.entries.keys().next_back().map_or(0, |max| max + 1)
    }

    /// Approximate heap footprint of the stored text.
    pub fn estimated_bytes(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.text.len() + e.source_file.len() + e.chunk_hash.len() + 64)
            .sum()
    }
}

/// Sidecar metadata, `<b64(name)>_meta.json`.
///
/// `next_label` only ever grows, which keeps labels unique even after the
/// highest one has been deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexMeta {
    pub next_label: u64,
    pub dimensions: usize,
    pub chunk_count: usize,
}

impl IndexMeta {
    /// Hands out the next label.
    pub fn allocate_label(&mut self) -> u64 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> ChunkEntry {
        ChunkEntry {
            text: text.to_string(),
            source_file: "a.txt".to_string(),
            chunk_hash: format!("hash-{text}"),
        }
    }

    #[test]
    fn test_json_shape_uses_string_labels_and_camel_case() -> anyhow::Result<()> {
        let mut map = ChunkMap::new();
        map.insert(3, entry("three"));
        let json = serde_json::to_value(&map)?;
        assert_eq!(json["3"]["sourceFile"], "a.txt");
        assert_eq!(json["3"]["chunkHash"], "hash-three");

        let back: ChunkMap = serde_json::from_value(json)?;
        assert_eq!(back, map);
        Ok(())
    }

    #[test]
    fn test_next_free_label_and_hashes() {
        let mut map = ChunkMap::new();
        assert_eq!(map.next_free_label(), 0);
        map.insert(0, entry("a"));
        map.insert(7, entry("b"));
        assert_eq!(map.next_free_label(), 8);
        map.remove(7);
        assert_eq!(map.next_free_label(), 1);
        assert!(map.hashes().contains("hash-a"));
        assert!(!map.hashes().contains("hash-b"));
    }

    #[test]
    fn test_allocate_label_is_monotonic() {
        let mut meta = IndexMeta {
            next_label: 5,
            ..Default::default()
        };
        assert_eq!(meta.allocate_label(), 5);
        assert_eq!(meta.allocate_label(), 6);
        assert_eq!(meta.next_label, 7);
    }
}
