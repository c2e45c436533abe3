//! Snapshot of which file contents each collection's index reflects.

use super::write_json_atomic;
use crate::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name → lowercase hex MD5 of its content.
pub type FileHashes = BTreeMap<String, String>;

/// Hex MD5 of a document's bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// `{ collection: { file: md5 } }`, persisted as `manifest.json`.
///
/// An entry is only replaced after the matching index write has succeeded,
/// so the manifest never describes a partially applied update.
#[derive(Debug, Default)]
pub struct Manifest {
    path: PathBuf,
    collections: BTreeMap<String, FileHashes>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(transparent)]
struct ManifestFile(BTreeMap<String, FileHashes>);

impl Manifest {
    /// Loads the manifest at `path`. A missing file is an empty manifest; an
    /// unreadable one is logged and treated as empty, which forces rebuilds.
    pub fn load(path: &Path) -> Result<Self> {
        let collections = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<ManifestFile>(&bytes) {
                Ok(file) => file.0,
                Err(e) => {
                    tracing::warn!("Ignoring corrupt manifest {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            collections,
        })
    }

    pub fn get(&self, collection: &str) -> Option<&FileHashes> {
        self.collections.get(collection)
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Replaces a collection's entry and persists the whole manifest.
    ///
    /// On a write failure the in-memory entry is restored so memory and disk
    /// keep agreeing.
    pub fn commit(&mut self, collection: &str, hashes: FileHashes) -> Result<()> {
        let previous = self.collections.insert(collection.to_string(), hashes);
        if let Err(e) = self.save() {
            match previous {
                Some(prev) => self.collections.insert(collection.to_string(), prev),
                None => self.collections.remove(collection),
            };
            return Err(e);
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &ManifestFile(self.collections.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_content_hash_is_md5_hex() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_hash(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_commit_round_trips_through_disk() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manifest.json");

        let mut manifest = Manifest::load(&path)?;
        assert!(manifest.is_empty());

        let hashes: FileHashes = [("a.txt".to_string(), content_hash(b"a"))].into();
        manifest.commit("notes", hashes.clone())?;

        let reloaded = Manifest::load(&path)?;
        assert_eq!(reloaded.get("notes"), Some(&hashes));
        assert_eq!(reloaded.collections().collect::<Vec<_>>(), vec!["notes"]);

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(raw["notes"]["a.txt"], content_hash(b"a"));
        Ok(())
    }

    #[test]
    fn test_corrupt_manifest_loads_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{not json")?;
        assert!(Manifest::load(&path)?.is_empty());
        Ok(())
    }
}
