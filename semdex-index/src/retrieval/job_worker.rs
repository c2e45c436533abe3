//! One-shot jobs that keep embedding calls and graph (de)serialization off the
//! orchestrator's control path.
//!
//! The orchestrator sends a [`JobRequest`] and awaits exactly one [`JobReply`].
//! Each job runs in its own task (its CPU and file work on the blocking pool),
//! shares nothing mutable with the orchestrator, and is torn down once it
//! has replied. Search jobs open their own read-only view of the on-disk index
//! and never see the orchestrator's resident copies.

use crate::error::{IndexError, Result};
use crate::retrieval::documents::{chunk_documents, file_hashes, read_documents};
use crate::retrieval::index_builder::build_full_index;
use crate::storage::index_store::IndexStore;
use crate::storage::manifest::FileHashes;
use semdex_context::TextChunker;
use semdex_embed::{EmbedConfig, EmbeddingProvider, embed_with_retry};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub text: String,
    pub source_file: String,
    pub distance: f32,
}

/// Work a job can be asked to do.
#[derive(Debug, Clone)]
pub enum JobRequest {
    /// Re-read, re-chunk and re-embed a whole collection, then replace its index.
    FullRebuild {
        collection: String,
        embedding: EmbedConfig,
    },
    /// Embed chunk texts for an incremental update.
    EmbedChunks {
        collection: String,
        texts: Vec<String>,
        embedding: EmbedConfig,
    },
    /// k-nearest-neighbour query against the on-disk index.
    Search {
        collection: String,
        vector: Vec<f32>,
        k: usize,
        ef_search: usize,
    },
}

impl JobRequest {
    /// Get a description of the job for logging
    pub fn description(&self) -> String {
        match self {
            Self::FullRebuild { collection, .. } => format!("full rebuild of '{collection}'"),
            Self::EmbedChunks {
                collection, texts, ..
            } => format!("embedding {} chunks for '{collection}'", texts.len()),
            Self::Search { collection, k, .. } => format!("search of '{collection}' (k={k})"),
        }
    }
}

/// The single terminal message a job sends back.
#[derive(Debug)]
pub enum JobReply {
    Rebuilt {
        manifest_entry: FileHashes,
        chunks: usize,
    },
    Embedded {
        vectors: Vec<Vec<f32>>,
    },
    Found {
        hits: Vec<SearchHit>,
    },
    Failed {
        job: String,
        error: IndexError,
    },
}

/// Immutable inputs every job may read.
pub struct WorkerEnv {
    pub root_dir: PathBuf,
    pub extensions: Vec<String>,
    pub chunker: TextChunker,
    pub store: IndexStore,
    pub provider: Arc<dyn EmbeddingProvider>,
}

/// Spawns jobs and collects their replies.
#[derive(Clone)]
pub struct JobRunner {
    env: Arc<WorkerEnv>,
    dispatched: Arc<AtomicU64>,
}

impl JobRunner {
    pub fn new(env: WorkerEnv) -> Self {
        Self {
            env: Arc::new(env),
            dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of jobs dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Runs `request` as a one-shot job and waits for its reply.
    ///
    /// Never fails: a job that panics or disappears is reported as
    /// [`JobReply::Failed`] with [`IndexError::WorkerFailure`].
    pub async fn dispatch(&self, request: JobRequest) -> JobReply {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let job = request.description();
        debug!("Dispatching {}", job);

        let env = Arc::clone(&self.env);
        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let reply = run_job(&env, request).await;
            // The requester may have gone away; nobody is left to tell.
            let _ = reply_tx.send(reply);
        });

        match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => {
                let reason = match handle.await {
                    Err(e) if e.is_panic() => "worker panicked".to_string(),
                    Err(e) => e.to_string(),
                    Ok(()) => "worker exited without replying".to_string(),
                };
                error!("Job {} died: {}", job, reason);
                JobReply::Failed {
                    error: IndexError::worker(job.clone(), reason),
                    job,
                }
            }
        }
    }
}

async fn run_job(env: &WorkerEnv, request: JobRequest) -> JobReply {
    let job = request.description();
    let outcome = match request {
        JobRequest::FullRebuild {
            collection,
            embedding,
        } => full_rebuild(env, &collection, &embedding)
            .await
            .map(|(manifest_entry, chunks)| JobReply::Rebuilt {
                manifest_entry,
                chunks,
            }),
        JobRequest::EmbedChunks {
            texts, embedding, ..
        } => embed_with_retry(
            env.provider.as_ref(),
            &texts,
            embedding.batch_size,
            &embedding.retry,
            &job,
        )
        .await
        .map(|vectors| JobReply::Embedded { vectors })
        .map_err(IndexError::from),
        JobRequest::Search {
            collection,
            vector,
            k,
            ef_search,
        } => {
            let store = env.store.clone();
            tokio::task::spawn_blocking(move || {
                search_on_disk(&store, &collection, &vector, k, ef_search)
            })
            .await
            .map_err(IndexError::from)
            .and_then(|r| r)
            .map(|hits| JobReply::Found { hits })
        }
    };
    outcome.unwrap_or_else(|error| JobReply::Failed { job, error })
}

async fn full_rebuild(
    env: &WorkerEnv,
    collection: &str,
    embedding: &EmbedConfig,
) -> Result<(FileHashes, usize)> {
    let started = std::time::Instant::now();
    let dir = env.root_dir.join(collection);
    let chunker = env.chunker.clone();
    let extensions = env.extensions.clone();
    let (hashes, chunks) = tokio::task::spawn_blocking(move || -> Result<_> {
        let docs = read_documents(&dir, &extensions)?;
        Ok((file_hashes(&docs), chunk_documents(&chunker, &docs)))
    })
    .await??;

    let vectors = if chunks.is_empty() {
        Vec::new()
    } else {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let job = format!("full rebuild of '{collection}'");
        embed_with_retry(
            env.provider.as_ref(),
            &texts,
            embedding.batch_size,
            &embedding.retry,
            &job,
        )
        .await?
    };

    let count = chunks.len();
    let store = env.store.clone();
    let name = collection.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let index = build_full_index(store.backend().as_ref(), chunks, vectors)?;
        store.persist(&name, &index)
    })
    .await??;

    info!(
        "Rebuilt '{}': {} files, {} chunks in {:?}",
        collection,
        hashes.len(),
        count,
        started.elapsed()
    );
    Ok((hashes, count))
}

fn search_on_disk(
    store: &IndexStore,
    collection: &str,
    vector: &[f32],
    k: usize,
    ef_search: usize,
) -> Result<Vec<SearchHit>> {
    let index = store
        .load(collection)?
        .ok_or_else(|| IndexError::missing(collection, "collection has not been indexed"))?;
    let Some(graph) = index.graph.as_ref() else {
        return Ok(Vec::new());
    };

    let mut hits: Vec<SearchHit> = graph
        .query(vector, k, ef_search)?
        .into_iter()
        .filter_map(|(label, distance)| {
            index.map.get(label).map(|entry| SearchHit {
                text: entry.text.clone(),
                source_file: entry.source_file.clone(),
                distance,
            })
        })
        .collect();
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(hits)
}
