//! Collection discovery, document reading and chunk extraction.

use crate::storage::chunk_map::ChunkEntry;
use crate::storage::manifest::{FileHashes, content_hash};
use semdex_context::TextChunker;
use std::collections::HashSet;
use std::path::Path;

/// A document read from a collection directory.
#[derive(Debug, Clone)]
pub struct Document {
    /// File name, relative to the collection directory
    pub name: String,
    pub content: String,
    /// Hex MD5 of the raw bytes
    pub hash: String,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

/// Names of the collection directories under `root`, sorted.
pub fn list_collections(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !is_hidden(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Documents directly inside `dir` with one of `extensions`, sorted by name.
///
/// Files that vanish or turn out not to be UTF-8 between listing and reading
/// are skipped with a warning.
pub fn read_documents(dir: &Path, extensions: &[String]) -> std::io::Result<Vec<Document>> {
    let mut docs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_hidden(&name) || !entry.file_type()?.is_file() || !has_extension(&path, extensions) {
            continue;
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Skipping unreadable {}: {}", path.display(), e);
                continue;
            }
        };
        let hash = content_hash(&bytes);
        match String::from_utf8(bytes) {
            Ok(content) => docs.push(Document {
                name,
                content,
                hash,
            }),
            Err(_) => tracing::warn!("Skipping non UTF-8 document {}", path.display()),
        }
    }
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(docs)
}

pub fn file_hashes(docs: &[Document]) -> FileHashes {
    docs.iter()
        .map(|d| (d.name.clone(), d.hash.clone()))
        .collect()
}

/// Chunks every document in order, keeping only the first occurrence of
/// each chunk hash across the whole collection.
pub fn chunk_documents(chunker: &TextChunker, docs: &[Document]) -> Vec<ChunkEntry> {
    let mut seen = HashSet::new();
    let mut chunks = Vec::new();
    for doc in docs {
        for chunk in chunker.chunk(&doc.content) {
            if seen.insert(chunk.hash.clone()) {
                chunks.push(ChunkEntry {
                    text: chunk.text,
                    source_file: doc.name.clone(),
                    chunk_hash: chunk.hash,
                });
            }
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdex_context::Tokenizer;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn exts() -> Vec<String> {
        vec!["txt".to_string(), "md".to_string()]
    }

    #[test]
    fn test_list_collections_skips_files_and_hidden_dirs() -> anyhow::Result<()> {
        let root = tempdir()?;
        std::fs::create_dir(root.path().join("b"))?;
        std::fs::create_dir(root.path().join("a"))?;
        std::fs::create_dir(root.path().join(".git"))?;
        std::fs::write(root.path().join("loose.txt"), "x")?;

        assert_eq!(list_collections(root.path())?, vec!["a", "b"]);
        assert!(list_collections(&root.path().join("missing"))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_read_documents_filters_and_sorts() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("b.md"), "bee")?;
        std::fs::write(dir.path().join("a.txt"), "ay")?;
        std::fs::write(dir.path().join("c.rs"), "fn main() {}")?;
        std::fs::write(dir.path().join(".hidden.txt"), "secret")?;
        std::fs::create_dir(dir.path().join("nested.txt"))?;

        let docs = read_documents(dir.path(), &exts())?;
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
        assert_eq!(docs[0].hash, content_hash(b"ay"));
        Ok(())
    }

    #[test]
    fn test_chunk_documents_deduplicates_across_files() {
        let chunker = TextChunker::with_tokenizer(Arc::new(WordTokenizer), 3, 0);
        let shared = "shared para here.";
        let docs = vec![
            Document {
                name: "a.txt".into(),
                content: format!("only in a. {shared}"),
                hash: "ha".into(),
            },
            Document {
                name: "b.txt".into(),
                content: format!("{shared} only in b."),
                hash: "hb".into(),
            },
        ];

        let chunks = chunk_documents(&chunker, &docs);
        let shared_chunks: Vec<_> = chunks.iter().filter(|c| c.text == shared).collect();
        assert_eq!(shared_chunks.len(), 1);
        assert_eq!(shared_chunks[0].source_file, "a.txt");
        assert_eq!(chunks.len(), 3);
    }
}
