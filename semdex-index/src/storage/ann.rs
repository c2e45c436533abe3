//! Approximate nearest-neighbour graph behind a narrow interface.
//!
//! Orchestration code only sees [`AnnIndex`] and [`AnnBackend`]; the HNSW
//! implementation ([`UsearchIndex`]) can be swapped without touching it.

use crate::error::{IndexError, Result};
use std::path::Path;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

const HNSW_CONNECTIVITY: usize = 16;
const HNSW_EXPANSION_ADD: usize = 200;
const HNSW_EXPANSION_SEARCH: usize = 64;
const MIN_CAPACITY: usize = 16;

/// A mutable ANN graph over fixed-dimension `f32` vectors keyed by label.
pub trait AnnIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Number of live (not soft-deleted) vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `label` is live in the graph.
    fn contains(&self, label: u64) -> bool;

    /// Adds a vector under `label`, growing capacity when needed.
    fn insert(&mut self, label: u64, vector: &[f32]) -> Result<()>;

    /// Marks `label` deleted; it no longer appears in query results.
    fn soft_delete(&mut self, label: u64) -> Result<()>;

    /// Up to `k` nearest labels with their distances, nearest first.
    fn query(&self, vector: &[f32], k: usize, ef_search: usize) -> Result<Vec<(u64, f32)>>;

    /// Writes the graph to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Approximate resident size in bytes.
    fn memory_bytes(&self) -> usize;
}

/// Creates and deserializes [`AnnIndex`] instances.
pub trait AnnBackend: Send + Sync {
    /// Empty graph with room for `capacity` vectors.
    fn create(&self, dimensions: usize, capacity: usize) -> Result<Box<dyn AnnIndex>>;

    /// Graph previously written with [`AnnIndex::save`].
    fn load(&self, path: &Path, dimensions: usize) -> Result<Box<dyn AnnIndex>>;
}

/// HNSW graph from `usearch`, squared-L2 metric.
pub struct UsearchIndex {
    inner: Index,
}

impl UsearchIndex {
    fn options(dimensions: usize) -> IndexOptions {
        IndexOptions {
            dimensions,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: HNSW_CONNECTIVITY,
            expansion_add: HNSW_EXPANSION_ADD,
            expansion_search: HNSW_EXPANSION_SEARCH,
            multi: false,
        }
    }

    fn reserve(&self, capacity: usize) -> Result<()> {
        self.inner.reserve(capacity).map_err(IndexError::ann)
    }

    fn ensure_room_for_one(&self) -> Result<()> {
        let capacity = self.inner.capacity();
        if self.inner.size() + 1 > capacity {
            self.reserve((capacity * 2).max(MIN_CAPACITY))?;
        }
        Ok(())
    }
}

impl AnnIndex for UsearchIndex {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn len(&self) -> usize {
        self.inner.size()
    }

    fn contains(&self, label: u64) -> bool {
        self.inner.contains(label)
    }

    fn insert(&mut self, label: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions(),
                actual: vector.len(),
            });
        }
        self.ensure_room_for_one()?;
        if self.inner.add(label, vector).is_ok() {
            return Ok(());
        }
        // Slots freed by soft deletes are not always reusable; grow and retry once.
        self.reserve((self.inner.capacity() * 2).max(MIN_CAPACITY))?;
        self.inner.add(label, vector).map_err(IndexError::ann)
    }

    fn soft_delete(&mut self, label: u64) -> Result<()> {
        self.inner.remove(label).map_err(IndexError::ann)?;
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize, ef_search: usize) -> Result<Vec<(u64, f32)>> {
        if vector.len() != self.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions(),
                actual: vector.len(),
            });
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        self.inner.change_expansion_search(ef_search.max(k));
        let matches = self.inner.search(vector, k).map_err(IndexError::ann)?;
        Ok(matches.keys.into_iter().zip(matches.distances).collect())
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.inner
            .save(&path.to_string_lossy())
            .map_err(IndexError::ann)
    }

    fn memory_bytes(&self) -> usize {
        self.inner.memory_usage()
    }
}

/// [`AnnBackend`] producing [`UsearchIndex`] graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsearchBackend;

impl AnnBackend for UsearchBackend {
    fn create(&self, dimensions: usize, capacity: usize) -> Result<Box<dyn AnnIndex>> {
        if dimensions == 0 {
            return Err(IndexError::ann("cannot create a zero-dimension index"));
        }
        let index = UsearchIndex {
            inner: Index::new(&UsearchIndex::options(dimensions)).map_err(IndexError::ann)?,
        };
        index.reserve(capacity.max(MIN_CAPACITY))?;
        Ok(Box::new(index))
    }

    fn load(&self, path: &Path, dimensions: usize) -> Result<Box<dyn AnnIndex>> {
        let index = UsearchIndex {
            inner: Index::new(&UsearchIndex::options(dimensions)).map_err(IndexError::ann)?,
        };
        index
            .inner
            .load(&path.to_string_lossy())
            .map_err(IndexError::ann)?;
        if index.dimensions() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                actual: index.dimensions(),
            });
        }
        Ok(Box::new(index))
    }
}
