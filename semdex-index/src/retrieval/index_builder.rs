//! Building and patching a collection's in-memory index.
//!
//! Both functions are synchronous and CPU bound; callers run them on the
//! blocking pool. Neither touches disk: persisting is the caller's decision,
//! taken only after everything here succeeded.

use crate::error::{IndexError, Result};
use crate::storage::ann::AnnBackend;
use crate::storage::chunk_map::{ChunkEntry, ChunkMap, IndexMeta};
use crate::storage::index_store::LoadedIndex;

fn uniform_dimension(vectors: &[Vec<f32>]) -> Result<usize> {
    let dimensions = vectors.first().map_or(0, Vec::len);
    if dimensions == 0 {
        return Err(IndexError::Configuration(
            "embedding service returned empty vectors".to_string(),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: bad.len(),
        });
    }
    Ok(dimensions)
}

/// Fresh index with labels `0..N` in chunk order, graph sized to exactly N.
///
/// `vectors[i]` must be the embedding of `chunks[i]`. Zero chunks produce an
/// empty index with no graph.
pub fn build_full_index(
    backend: &dyn AnnBackend,
    chunks: Vec<ChunkEntry>,
    vectors: Vec<Vec<f32>>,
) -> Result<LoadedIndex> {
    if chunks.len() != vectors.len() {
        return Err(IndexError::Configuration(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    if chunks.is_empty() {
        return Ok(LoadedIndex::empty());
    }

    let dimensions = uniform_dimension(&vectors)?;
    let mut graph = backend.create(dimensions, chunks.len())?;
    let mut map = ChunkMap::new();
    for (label, (chunk, vector)) in chunks.into_iter().zip(vectors).enumerate() {
        let label = label as u64;
        graph.insert(label, &vector)?;
        map.insert(label, chunk);
    }

    let meta = IndexMeta {
        next_label: map.len() as u64,
        dimensions,
        chunk_count: map.len(),
    };
    Ok(LoadedIndex {
        graph: Some(graph),
        map,
        meta,
    })
}

/// Soft-deletes `labels_to_delete`, then inserts `additions` under freshly
/// allocated labels.
///
/// On error the index may be partially modified and must be discarded; the
/// on-disk copy is still the last good state.
pub fn apply_changes(
    index: &mut LoadedIndex,
    backend: &dyn AnnBackend,
    labels_to_delete: &[u64],
    additions: Vec<(ChunkEntry, Vec<f32>)>,
) -> Result<()> {
    for &label in labels_to_delete {
        if let Some(graph) = index.graph.as_mut() {
            graph.soft_delete(label)?;
        }
        index.map.remove(label);
    }

    if additions.is_empty() {
        index.meta.chunk_count = index.map.len();
        return Ok(());
    }

    let vectors: Vec<Vec<f32>> = additions.iter().map(|(_, v)| v.clone()).collect();
    let dimensions = uniform_dimension(&vectors)?;
    let graph = match index.graph.take() {
        Some(graph) => graph,
        None => backend.create(dimensions, additions.len())?,
    };
    let graph = index.graph.insert(graph);
    if graph.dimensions() != dimensions {
        return Err(IndexError::DimensionMismatch {
            expected: graph.dimensions(),
            actual: dimensions,
        });
    }

    for (chunk, vector) in additions {
        let label = index.meta.allocate_label();
        graph.insert(label, &vector)?;
        index.map.insert(label, chunk);
    }
    index.meta.dimensions = dimensions;
    index.meta.chunk_count = index.map.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ann::UsearchBackend;

    fn chunk(text: &str) -> ChunkEntry {
        ChunkEntry {
            text: text.to_string(),
            source_file: "a.txt".to_string(),
            chunk_hash: semdex_context::chunk_hash(text),
        }
    }

    #[test]
    fn test_full_build_assigns_sequential_labels() -> anyhow::Result<()> {
        let index = build_full_index(
            &UsearchBackend,
            vec![chunk("a"), chunk("b"), chunk("c")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )?;
        assert_eq!(index.map.len(), 3);
        assert_eq!(index.map.get(2).map(|e| e.text.as_str()), Some("c"));
        assert_eq!(index.meta.next_label, 3);
        assert_eq!(index.meta.dimensions, 2);
        assert_eq!(index.graph.as_ref().map(|g| g.len()), Some(3));
        Ok(())
    }

    #[test]
    fn test_full_build_of_nothing_has_no_graph() -> anyhow::Result<()> {
        let index = build_full_index(&UsearchBackend, Vec::new(), Vec::new())?;
        assert!(index.graph.is_none());
        assert!(index.map.is_empty());
        Ok(())
    }

    #[test]
    fn test_apply_changes_never_reuses_labels() -> anyhow::Result<()> {
        let mut index = build_full_index(
            &UsearchBackend,
            vec![chunk("a"), chunk("b")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )?;

        apply_changes(&mut index, &UsearchBackend, &[1], vec![(chunk("c"), vec![0.5, 0.5])])?;
        assert!(index.map.get(1).is_none());
        assert_eq!(index.map.get(2).map(|e| e.text.as_str()), Some("c"));

        apply_changes(&mut index, &UsearchBackend, &[2], vec![(chunk("d"), vec![0.2, 0.8])])?;
        assert_eq!(index.map.get(3).map(|e| e.text.as_str()), Some("d"));
        assert_eq!(index.meta.next_label, 4);
        assert_eq!(index.map.len(), 2);
        assert_eq!(index.graph.as_ref().map(|g| g.len()), Some(2));
        Ok(())
    }

    #[test]
    fn test_apply_changes_creates_missing_graph() -> anyhow::Result<()> {
        let mut index = LoadedIndex::empty();
        apply_changes(&mut index, &UsearchBackend, &[], vec![(chunk("x"), vec![1.0, 2.0, 3.0])])?;
        assert_eq!(index.graph.as_ref().map(|g| g.dimensions()), Some(3));
        assert_eq!(index.meta.dimensions, 3);
        Ok(())
    }

    #[test]
    fn test_dimension_change_is_rejected() -> anyhow::Result<()> {
        let mut index = build_full_index(&UsearchBackend, vec![chunk("a")], vec![vec![1.0, 0.0]])?;
        let err = apply_changes(&mut index, &UsearchBackend, &[], vec![(chunk("b"), vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, actual: 3 }));
        Ok(())
    }
}
