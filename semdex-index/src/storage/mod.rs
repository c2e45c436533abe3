//! On-disk state for semdex-index
//!
//! Everything lives flat in the store directory:
//!
//! ```text
//! <store>/manifest.json          collection → file → md5        (manifest)
//! <store>/usage_stats.json       collection → frequency/time    (retrieval::usage)
//! <store>/<b64(name)>.bin        serialized ANN graph           (ann)
//! <store>/<b64(name)>_map.json   label → chunk                  (chunk_map)
//! <store>/<b64(name)>_meta.json  next label, dimension, count   (chunk_map)
//! ```
//!
//! `b64` is URL-safe base64 without padding, so any collection name maps to a
//! file-system-safe stem. Every file is replaced atomically via a temp file in
//! the same directory followed by a rename; readers never observe a torn write.
//!
//! ## Key Components
//!
//! - **AnnIndex / AnnBackend**: narrow interface over the HNSW library
//! - **ChunkMap / IndexMeta**: label bookkeeping persisted beside the graph
//! - **IndexStore**: load and persist a collection's graph, map and metadata
//! - **Manifest**: last successfully indexed file hashes per collection

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub mod ann;
pub mod chunk_map;
pub mod index_store;
pub mod manifest;

pub use ann::{AnnBackend, AnnIndex, UsearchBackend};
pub use chunk_map::{ChunkEntry, ChunkMap, IndexMeta};
pub use index_store::{IndexStore, LoadedIndex};
pub use manifest::{FileHashes, Manifest};

/// Writes `bytes` to a synced temp file beside `path` without touching
/// `path` itself. The file is removed if dropped before being persisted.
pub fn stage(path: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Replaces `path` with `bytes` via a synced temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    stage(path, bytes)?.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> crate::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)?;
    Ok(())
}
