//! Decides how a collection's index has to change.
//!
//! Two levels: [`needs_update`] is a cheap file-level check against the
//! manifest, and [`compute_changeset`] is the content-addressed chunk diff
//! that drives incremental updates. Moving, duplicating or reordering text
//! that was already indexed produces an empty diff.

use crate::storage::chunk_map::{ChunkEntry, ChunkMap};
use crate::storage::manifest::FileHashes;
use std::collections::HashSet;

/// True when the tracked files differ from the manifest in count, name or hash.
pub fn needs_update(current: &FileHashes, manifest: Option<&FileHashes>) -> bool {
    let Some(previous) = manifest else {
        return !current.is_empty();
    };
    if current.len() != previous.len() {
        return true;
    }
    current
        .iter()
        .any(|(file, hash)| previous.get(file) != Some(hash))
}

/// Chunk-level difference between the documents on disk and the chunk map.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Chunks whose hash is not in the map, in document order
    pub chunks_to_add: Vec<ChunkEntry>,
    /// Labels whose chunk hash no longer occurs in any document
    pub labels_to_delete: Vec<u64>,
    /// File hashes to record once the change is applied
    pub new_file_hashes: FileHashes,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.chunks_to_add.is_empty() && self.labels_to_delete.is_empty()
    }

    /// `(added + deleted) / previous`. Infinite when nothing was indexed before.
    pub fn change_ratio(&self, previous_chunks: usize) -> f64 {
        if previous_chunks == 0 {
            return f64::INFINITY;
        }
        (self.chunks_to_add.len() + self.labels_to_delete.len()) as f64 / previous_chunks as f64
    }
}

/// Diffs the current (already de-duplicated) chunks against `map`.
pub fn compute_changeset(
    current_chunks: Vec<ChunkEntry>,
    new_file_hashes: FileHashes,
    map: &ChunkMap,
) -> Changeset {
    let indexed = map.hashes();
    let current: HashSet<&str> = current_chunks.iter().map(|c| c.chunk_hash.as_str()).collect();

    let labels_to_delete = map
        .iter()
        .filter(|(_, entry)| !current.contains(entry.chunk_hash.as_str()))
        .map(|(label, _)| label)
        .collect();

    let chunks_to_add = current_chunks
        .iter()
        .filter(|c| !indexed.contains(c.chunk_hash.as_str()))
        .cloned()
        .collect();

    Changeset {
        chunks_to_add,
        labels_to_delete,
        new_file_hashes,
    }
}

/// What to do with a collection after diffing.
#[derive(Debug, Clone)]
pub enum UpdatePlan {
    /// Files changed but chunk content did not; only the manifest moves.
    ManifestOnly(FileHashes),
    Incremental(Changeset),
    FullRebuild,
}

/// Picks the update strategy for a changeset.
///
/// A full rebuild is required when nothing was indexed before or when the
/// change ratio exceeds `threshold`.
pub fn plan_update(changeset: Changeset, previous_chunks: usize, threshold: f64) -> UpdatePlan {
    let ratio = changeset.change_ratio(previous_chunks);
    if previous_chunks == 0 || ratio > threshold {
        return UpdatePlan::FullRebuild;
    }
    if changeset.is_empty() {
        return UpdatePlan::ManifestOnly(changeset.new_file_hashes);
    }
    UpdatePlan::Incremental(changeset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, file: &str) -> ChunkEntry {
        ChunkEntry {
            text: text.to_string(),
            source_file: file.to_string(),
            chunk_hash: semdex_context::chunk_hash(text),
        }
    }

    fn hashes(pairs: &[(&str, &str)]) -> FileHashes {
        pairs
            .iter()
            .map(|(f, h)| (f.to_string(), h.to_string()))
            .collect()
    }

    fn map_of(chunks: &[ChunkEntry]) -> ChunkMap {
        let mut map = ChunkMap::new();
        for (label, c) in chunks.iter().enumerate() {
            map.insert(label as u64, c.clone());
        }
        map
    }

    #[test]
    fn test_needs_update_cases() {
        let current = hashes(&[("a.txt", "1"), ("b.txt", "2")]);
        assert!(needs_update(&current, None));
        assert!(!needs_update(&FileHashes::new(), None));
        assert!(!needs_update(&current, Some(&current.clone())));
        assert!(needs_update(&current, Some(&hashes(&[("a.txt", "1")]))));
        assert!(needs_update(&current, Some(&hashes(&[("a.txt", "1"), ("c.txt", "2")]))));
        assert!(needs_update(&current, Some(&hashes(&[("a.txt", "1"), ("b.txt", "X")]))));
    }

    #[test]
    fn test_unchanged_content_yields_empty_changeset_twice() {
        let chunks = vec![chunk("one", "a.txt"), chunk("two", "a.txt")];
        let map = map_of(&chunks);

        let first = compute_changeset(chunks.clone(), FileHashes::new(), &map);
        let second = compute_changeset(chunks, FileHashes::new(), &map);
        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn test_moving_text_between_files_is_not_a_change() {
        let map = map_of(&[chunk("one", "a.txt"), chunk("two", "b.txt")]);
        let moved = vec![chunk("two", "a.txt"), chunk("one", "c.txt")];
        assert!(compute_changeset(moved, FileHashes::new(), &map).is_empty());
    }

    #[test]
    fn test_edits_produce_adds_and_deletes() {
        let map = map_of(&[chunk("one", "a.txt"), chunk("two", "a.txt"), chunk("three", "a.txt")]);
        let current = vec![chunk("one", "a.txt"), chunk("two!", "a.txt"), chunk("three", "a.txt")];
        let cs = compute_changeset(current, hashes(&[("a.txt", "new")]), &map);

        assert_eq!(cs.chunks_to_add.len(), 1);
        assert_eq!(cs.chunks_to_add[0].text, "two!");
        assert_eq!(cs.labels_to_delete, vec![1]);
        assert!((cs.change_ratio(3) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_update() {
        let map = map_of(&[chunk("a", "f"), chunk("b", "f"), chunk("c", "f"), chunk("d", "f")]);
        let small = compute_changeset(
            vec![chunk("a", "f"), chunk("b", "f"), chunk("c", "f"), chunk("d", "f"), chunk("e", "f")],
            FileHashes::new(),
            &map,
        );
        assert!(matches!(plan_update(small.clone(), 4, 0.5), UpdatePlan::Incremental(_)));
        assert!(matches!(plan_update(small, 4, 0.2), UpdatePlan::FullRebuild));

        let none = compute_changeset(vec![chunk("a", "f")], FileHashes::new(), &map_of(&[chunk("a", "f")]));
        assert!(matches!(plan_update(none.clone(), 1, 0.5), UpdatePlan::ManifestOnly(_)));
        assert!(matches!(plan_update(none, 0, 0.5), UpdatePlan::FullRebuild));
    }
}
