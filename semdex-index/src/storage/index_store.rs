//! Per-collection graph, chunk map and metadata on disk.

use super::ann::{AnnBackend, AnnIndex};
use super::chunk_map::{ChunkMap, IndexMeta};
use super::stage;
use crate::error::{IndexError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A collection's index as read from disk.
pub struct LoadedIndex {
    /// `None` when the collection has no vectors.
    pub graph: Option<Box<dyn AnnIndex>>,
    pub map: ChunkMap,
    pub meta: IndexMeta,
}

impl LoadedIndex {
    pub fn empty() -> Self {
        Self {
            graph: None,
            map: ChunkMap::new(),
            meta: IndexMeta::default(),
        }
    }

    /// Approximate resident size in bytes.
    pub fn estimated_bytes(&self) -> u64 {
        let graph = self.graph.as_ref().map_or(0, |g| g.memory_bytes());
        (graph + self.map.estimated_bytes()) as u64
    }
}

/// Reads and writes collection indices under the store directory.
///
/// Cheap to clone; jobs each get their own handle and open their own views.
#[derive(Clone)]
pub struct IndexStore {
    dir: PathBuf,
    backend: Arc<dyn AnnBackend>,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>, backend: Arc<dyn AnnBackend>) -> Self {
        Self {
            dir: dir.into(),
            backend,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backend(&self) -> &Arc<dyn AnnBackend> {
        &self.backend
    }

    /// URL-safe base64 (no padding) of the collection name.
    pub fn file_stem(collection: &str) -> String {
        URL_SAFE_NO_PAD.encode(collection.as_bytes())
    }

    pub fn graph_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", Self::file_stem(collection)))
    }

    pub fn map_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}_map.json", Self::file_stem(collection)))
    }

    pub fn meta_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}_meta.json", Self::file_stem(collection)))
    }

    pub fn has_map(&self, collection: &str) -> bool {
        self.map_path(collection).is_file()
    }

    /// The chunk map, or an empty one if the collection was never indexed.
    pub fn load_map(&self, collection: &str) -> Result<ChunkMap> {
        match std::fs::read(self.map_path(collection)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| IndexError::missing(collection, format!("unreadable chunk map: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ChunkMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// The metadata sidecar, if present and readable.
    pub fn load_meta(&self, collection: &str) -> Option<IndexMeta> {
        let bytes = std::fs::read(self.meta_path(collection)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!("Ignoring unreadable metadata for '{}': {}", collection, e);
                None
            }
        }
    }

    /// Opens the collection's graph and map.
    ///
    /// Returns `Ok(None)` when the collection has never been indexed. A map
    /// with entries but no loadable graph is [`IndexError::IndexMissingOrCorrupt`].
    pub fn load(&self, collection: &str) -> Result<Option<LoadedIndex>> {
        if !self.has_map(collection) {
            return Ok(None);
        }
        let map = self.load_map(collection)?;
        let stored_meta = self.load_meta(collection);
        let graph_path = self.graph_path(collection);

        let graph = if graph_path.is_file() {
            let dimensions = stored_meta.map_or(0, |m| m.dimensions);
            if dimensions == 0 {
                return Err(IndexError::missing(collection, "graph has no dimension metadata"));
            }
            let graph = self
                .backend
                .load(&graph_path, dimensions)
                .map_err(|e| IndexError::missing(collection, format!("unreadable graph: {e}")))?;
            Some(graph)
        } else {
            None
        };

        match &graph {
            None if !map.is_empty() => {
                return Err(IndexError::missing(collection, "graph file is absent"));
            }
            Some(graph) if graph.len() != map.len() => {
                return Err(IndexError::missing(
                    collection,
                    format!("graph holds {} vectors but map has {} chunks", graph.len(), map.len()),
                ));
            }
            Some(graph) => {
                if let Some((label, _)) = map.iter().find(|(label, _)| !graph.contains(*label)) {
                    return Err(IndexError::missing(
                        collection,
                        format!("label {label} is mapped but absent from the graph"),
                    ));
                }
            }
            None => {}
        }

        let mut meta = stored_meta.unwrap_or_default();
        meta.next_label = meta.next_label.max(map.next_free_label());
        meta.chunk_count = map.len();
        Ok(Some(LoadedIndex { graph, map, meta }))
    }

    /// Writes graph, metadata and map.
    ///
    /// All three are staged to temp files first and only renamed into place
    /// once every write succeeded, map last. If a rename fails the previous
    /// graph is restored, so the graph on disk always matches the map. With
    /// no graph (or an empty map) any stale graph file is removed.
    pub fn persist(&self, collection: &str, index: &LoadedIndex) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let graph_path = self.graph_path(collection);
        let meta_path = self.meta_path(collection);
        let map_path = self.map_path(collection);

        let staged_graph = match index.graph.as_ref().filter(|_| !index.map.is_empty()) {
            Some(graph) => {
                let tmp = tempfile::Builder::new()
                    .suffix(".bin.tmp")
                    .tempfile_in(&self.dir)?
                    .into_temp_path();
                graph.save(&tmp)?;
                Some(tmp)
            }
            None => None,
        };
        let meta = IndexMeta {
            chunk_count: index.map.len(),
            ..index.meta
        };
        let staged_meta = stage(&meta_path, &serde_json::to_vec_pretty(&meta)?)?;
        let staged_map = stage(&map_path, &serde_json::to_vec_pretty(&index.map)?)?;

        // The previous graph is set aside so a failed commit can put it back.
        let backup = graph_path.with_extension("bin.bak");
        let had_graph = graph_path.is_file();
        if had_graph {
            std::fs::rename(&graph_path, &backup)?;
        }

        let committed = (|| -> std::io::Result<()> {
            if let Some(tmp) = staged_graph {
                tmp.persist(&graph_path).map_err(|e| e.error)?;
            }
            staged_meta.persist(&meta_path).map_err(|e| e.error)?;
            staged_map.persist(&map_path).map_err(|e| e.error)?;
            Ok(())
        })();

        match committed {
            Ok(()) => {
                if had_graph {
                    std::fs::remove_file(&backup)?;
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Persisting '{}' failed, restoring previous graph: {}", collection, e);
                if had_graph {
                    std::fs::rename(&backup, &graph_path)?;
                } else if graph_path.exists() {
                    std::fs::remove_file(&graph_path)?;
                }
                Err(e.into())
            }
        }
    }
}
