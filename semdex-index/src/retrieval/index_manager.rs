//! Orchestrator that keeps every collection's index in step with its documents
//! and answers similarity queries.
//!
//! ## Pipeline Flow
//!
//! ```text
//! DirectoryWatcher → sync_collection → change_detector ─┬─ ManifestOnly ──────────────┐
//!                                                        ├─ Incremental → EmbedChunks ─┤→ persist → Manifest
//!                                                        └─ FullRebuild (job) ─────────┘
//!
//! search → SearchCache ─(miss)→ Search (job, own on-disk view) → cache + usage
//! ```
//!
//! ## Invariants
//!
//! - At most one write runs per collection. A sync requested while one is in
//!   flight returns [`SyncOutcome::InFlight`] and does nothing.
//! - The manifest entry moves only after graph, map and metadata were
//!   persisted. A failed write leaves the previous on-disk state in place.
//! - [`IndexManager::search`] never fails; every error degrades to no results.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::retrieval::change_detector::{UpdatePlan, compute_changeset, needs_update, plan_update};
use crate::retrieval::directory_watcher::{ChangeHandler, DirectoryWatcher};
use crate::retrieval::documents::{chunk_documents, file_hashes, list_collections, read_documents};
use crate::retrieval::index_builder::apply_changes;
use crate::retrieval::job_worker::{JobReply, JobRequest, JobRunner, SearchHit, WorkerEnv};
use crate::retrieval::memory::{MemoryProbe, ProcessMemoryProbe, ResidentSet};
use crate::retrieval::search_cache::{CacheStats, SearchCache};
use crate::retrieval::usage::{UsagePersister, UsageTracker};
use crate::storage::ann::{AnnBackend, UsearchBackend};
use crate::storage::index_store::{IndexStore, LoadedIndex};
use crate::storage::manifest::Manifest;
use async_trait::async_trait;
use semdex_context::TextChunker;
use semdex_embed::{EmbeddingProvider, HttpEmbeddingProvider};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, error, info, warn};

/// What a sync did to one collection.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Another write for the collection was already running
    InFlight,
    Unchanged,
    /// File hashes changed but no chunk did
    ManifestOnly,
    Incremental { added: usize, deleted: usize },
    Rebuilt { chunks: usize },
    /// The collection directory is gone; its resident copy was dropped
    Removed,
    /// Nothing was committed
    Failed(IndexError),
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-collection line of [`HealthStatus`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionHealth {
    pub name: String,
    pub chunks: usize,
    pub resident: bool,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub total_indices: usize,
    pub total_chunks: usize,
    pub avg_search_time_ms: f64,
    pub cache_stats: CacheStats,
    pub resident_collections: Vec<String>,
    pub searches: u64,
    pub cache_hit_rate: f64,
    pub collections: Vec<CollectionHealth>,
}

#[derive(Debug, Default)]
struct SearchStats {
    searches: u64,
    total_time: Duration,
}

impl SearchStats {
    fn record(&mut self, elapsed: Duration) {
        self.searches += 1;
        self.total_time += elapsed;
    }

    fn avg_ms(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            self.total_time.as_secs_f64() * 1000.0 / self.searches as f64
        }
    }
}

/// Builder for [`IndexManager`]. Anything not supplied is derived from the
/// configuration.
pub struct IndexManagerBuilder {
    config: IndexConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<TextChunker>,
    backend: Option<Arc<dyn AnnBackend>>,
    probe: Option<Arc<dyn MemoryProbe>>,
}

impl IndexManagerBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            provider: None,
            chunker: None,
            backend: None,
            probe: None,
        }
    }

    /// Embedding provider; defaults to the HTTP provider built from `config.embedding`.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Chunker; defaults to the cl100k tokenizer with the configured budget.
    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn AnnBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<IndexManager> {
        let config = self.config;
        std::fs::create_dir_all(&config.store_dir)?;

        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(HttpEmbeddingProvider::new(&config.embedding)?),
        };
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => TextChunker::new(config.max_tokens, config.overlap_tokens)
                .map_err(|e| IndexError::Configuration(format!("chunker: {e:#}")))?,
        };
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(UsearchBackend) as Arc<dyn AnnBackend>);
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcessMemoryProbe::new()) as Arc<dyn MemoryProbe>);

        let store = IndexStore::new(&config.store_dir, backend);
        let manifest = Manifest::load(&config.manifest_path())?;
        let usage = UsageTracker::load(&config.usage_stats_path());
        info!(
            "Index manager over {} (store {}), provider '{}', {} collections in manifest",
            config.root_dir.display(),
            config.store_dir.display(),
            provider.provider_name(),
            manifest.len()
        );

        let runner = JobRunner::new(WorkerEnv {
            root_dir: config.root_dir.clone(),
            extensions: config.extensions.clone(),
            chunker: chunker.clone(),
            store: store.clone(),
            provider,
        });

        Ok(IndexManager {
            inner: Arc::new(Inner {
                cache: Mutex::new(SearchCache::new(config.cache_size, config.cache_ttl())),
                resident: Mutex::new(ResidentSet::new(config.max_memory_bytes())),
                manifest: Mutex::new(manifest),
                usage: UsagePersister::new(usage),
                usage_marks: OnceLock::new(),
                stats: Mutex::new(SearchStats::default()),
                in_flight: std::sync::Mutex::new(HashSet::new()),
                in_flight_done: Notify::new(),
                watcher: Mutex::new(None),
                config,
                chunker,
                store,
                runner,
                probe,
            }),
        })
    }
}

struct Inner {
    config: IndexConfig,
    chunker: TextChunker,
    store: IndexStore,
    runner: JobRunner,
    probe: Arc<dyn MemoryProbe>,
    manifest: Mutex<Manifest>,
    resident: Mutex<ResidentSet>,
    cache: Mutex<SearchCache>,
    usage: UsagePersister,
    /// Wakes the usage writer; the writer is started on first use.
    usage_marks: OnceLock<watch::Sender<u64>>,
    stats: Mutex<SearchStats>,
    in_flight: std::sync::Mutex<HashSet<String>>,
    in_flight_done: Notify,
    watcher: Mutex<Option<DirectoryWatcher>>,
}

/// Marks a collection as being written until dropped.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    collection: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.inner.in_flight.lock() {
            set.remove(&self.collection);
        }
        self.inner.in_flight_done.notify_waiters();
    }
}

impl Inner {
    fn try_begin(&self, collection: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(collection.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            inner: self,
            collection: collection.to_string(),
        })
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map_or(0, |set| set.len())
    }
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct IndexManager {
    inner: Arc<Inner>,
}

impl IndexManager {
    pub fn builder(config: IndexConfig) -> IndexManagerBuilder {
        IndexManagerBuilder::new(config)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    /// Jobs handed to workers so far (rebuilds, embeddings and searches).
    pub fn worker_dispatches(&self) -> u64 {
        self.inner.runner.dispatched()
    }

    /// Brings every collection up to date, pre-warms the most used ones and
    /// starts watching the documents root.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let outcomes = self.sync_all().await?;
        let failed = outcomes.iter().filter(|(_, o)| o.is_failure()).count();
        info!(
            "Initial sync of {} collections finished in {:?} ({} failed)",
            outcomes.len(),
            started.elapsed(),
            failed
        );

        self.prewarm().await;

        let watcher = DirectoryWatcher::start(
            &self.inner.config.root_dir,
            self.inner.config.watch_debounce(),
            Arc::new(WatchHandler {
                inner: Arc::downgrade(&self.inner),
            }),
        )?;
        if let Some(previous) = self.inner.watcher.lock().await.replace(watcher) {
            previous.stop().await;
        }
        Ok(())
    }

    /// Syncs every collection on disk plus every collection the manifest
    /// still remembers, concurrently.
    pub async fn sync_all(&self) -> Result<Vec<(String, SyncOutcome)>> {
        let root = self.inner.config.root_dir.clone();
        let mut names: BTreeSet<String> =
            tokio::task::spawn_blocking(move || list_collections(&root)).await??.into_iter().collect();
        names.extend(
            self.inner
                .manifest
                .lock()
                .await
                .collections()
                .map(str::to_string),
        );
        debug!("Scanning {} collections", names.len());

        let outcomes = futures::future::join_all(names.iter().map(|name| self.sync_collection(name))).await;
        Ok(names.into_iter().zip(outcomes).collect())
    }

    /// Brings one collection's index in line with its documents.
    pub async fn sync_collection(&self, collection: &str) -> SyncOutcome {
        let Some(_guard) = self.inner.try_begin(collection) else {
            debug!(collection = %collection, "Write already in flight, skipping");
            return SyncOutcome::InFlight;
        };

        match self.sync_exclusive(collection).await {
            Ok(outcome) => {
                debug!(collection = %collection, ?outcome, "Sync finished");
                outcome
            }
            Err(err) => {
                error!(collection = %collection, "Sync failed, keeping last good index: {}", err);
                SyncOutcome::Failed(err)
            }
        }
    }

    async fn sync_exclusive(&self, collection: &str) -> Result<SyncOutcome> {
        let dir = self.inner.config.root_dir.join(collection);
        if !dir.is_dir() {
            let was_resident = self.inner.resident.lock().await.take(collection).is_some();
            self.inner.cache.lock().await.invalidate_collection(collection);
            info!(collection = %collection, was_resident, "Collection directory is gone");
            return Ok(SyncOutcome::Removed);
        }

        let extensions = self.inner.config.extensions.clone();
        let docs = tokio::task::spawn_blocking(move || read_documents(&dir, &extensions)).await??;
        let hashes = file_hashes(&docs);

        let previous = self.inner.manifest.lock().await.get(collection).cloned();
        let indexed = self.inner.store.has_map(collection);
        if !needs_update(&hashes, previous.as_ref()) && (indexed || hashes.is_empty()) {
            return Ok(SyncOutcome::Unchanged);
        }

        let index = match self.checkout(collection).await {
            Ok(Some(index)) => index,
            Ok(None) => return self.rebuild(collection).await,
            Err(err @ IndexError::IndexMissingOrCorrupt { .. }) => {
                warn!(collection = %collection, "{}; rebuilding from scratch", err);
                return self.rebuild(collection).await;
            }
            Err(err) => return Err(err),
        };

        let chunker = self.inner.chunker.clone();
        let chunks = tokio::task::spawn_blocking(move || chunk_documents(&chunker, &docs)).await?;
        let previous_chunks = index.map.len();
        let changeset = compute_changeset(chunks, hashes, &index.map);

        match plan_update(changeset, previous_chunks, self.inner.config.change_ratio_threshold) {
            UpdatePlan::ManifestOnly(hashes) => {
                self.inner.resident.lock().await.put(collection, index);
                self.inner.manifest.lock().await.commit(collection, hashes)?;
                info!(collection = %collection, "Files changed without chunk changes; manifest updated");
                Ok(SyncOutcome::ManifestOnly)
            }
            UpdatePlan::FullRebuild => {
                drop(index);
                self.rebuild(collection).await
            }
            UpdatePlan::Incremental(changeset) => {
                let added = changeset.chunks_to_add.len();
                let deleted = changeset.labels_to_delete.len();
                info!(collection = %collection, added, deleted, "Applying incremental update");

                let texts: Vec<String> = changeset.chunks_to_add.iter().map(|c| c.text.clone()).collect();
                let vectors = self.embed(collection, texts).await?;
                let additions = changeset.chunks_to_add.into_iter().zip(vectors).collect();

                let store = self.inner.store.clone();
                let name = collection.to_string();
                let labels_to_delete = changeset.labels_to_delete;
                let index = tokio::task::spawn_blocking(move || -> Result<LoadedIndex> {
                    let mut index = index;
                    apply_changes(&mut index, store.backend().as_ref(), &labels_to_delete, additions)?;
                    store.persist(&name, &index)?;
                    Ok(index)
                })
                .await??;

                self.inner
                    .manifest
                    .lock()
                    .await
                    .commit(collection, changeset.new_file_hashes)?;
                self.inner.cache.lock().await.invalidate_collection(collection);
                self.inner.resident.lock().await.put(collection, index);
                Ok(SyncOutcome::Incremental { added, deleted })
            }
        }
    }

    /// Takes the collection's index out of the resident set, loading it from
    /// disk when it is not resident. `None` when the collection was never indexed.
    async fn checkout(&self, collection: &str) -> Result<Option<LoadedIndex>> {
        {
            let mut resident = self.inner.resident.lock().await;
            if let Some(index) = resident.take(collection) {
                return Ok(Some(index));
            }
            resident.make_room(self.inner.probe.as_ref());
        }
        let store = self.inner.store.clone();
        let name = collection.to_string();
        tokio::task::spawn_blocking(move || store.load(&name)).await?
    }

    async fn embed(&self, collection: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let request = JobRequest::EmbedChunks {
            collection: collection.to_string(),
            texts,
            embedding: self.inner.config.embedding.clone(),
        };
        let job = request.description();
        match self.inner.runner.dispatch(request).await {
            JobReply::Embedded { vectors } if vectors.len() == expected => Ok(vectors),
            JobReply::Embedded { vectors } => Err(IndexError::worker(
                job,
                format!("expected {expected} vectors, got {}", vectors.len()),
            )),
            JobReply::Failed { error, .. } => Err(error),
            other => Err(unexpected_reply(job, &other)),
        }
    }

    async fn rebuild(&self, collection: &str) -> Result<SyncOutcome> {
        info!(collection = %collection, "Starting full rebuild");
        let request = JobRequest::FullRebuild {
            collection: collection.to_string(),
            embedding: self.inner.config.embedding.clone(),
        };
        let job = request.description();
        match self.inner.runner.dispatch(request).await {
            JobReply::Rebuilt {
                manifest_entry,
                chunks,
            } => {
                // Any resident copy predates the rebuild
                self.inner.resident.lock().await.take(collection);
                self.inner.manifest.lock().await.commit(collection, manifest_entry)?;
                self.inner.cache.lock().await.invalidate_collection(collection);
                Ok(SyncOutcome::Rebuilt { chunks })
            }
            JobReply::Failed { error, .. } => Err(error),
            other => Err(unexpected_reply(job, &other)),
        }
    }

    /// Loads the most frequently searched collections into memory. Returns how
    /// many were loaded.
    pub async fn prewarm(&self) -> usize {
        let count = self.inner.config.prewarm_count;
        let hottest = self.inner.usage.tracker().lock().await.hottest(count);
        let mut loaded = 0;
        for collection in hottest {
            if self.inner.resident.lock().await.contains(&collection) {
                continue;
            }
            match self.checkout(&collection).await {
                Ok(Some(index)) => {
                    self.inner.resident.lock().await.put(&collection, index);
                    loaded += 1;
                }
                Ok(None) => debug!(collection = %collection, "Nothing on disk to pre-warm"),
                Err(err) => warn!(collection = %collection, "Pre-warm failed: {}", err),
            }
        }
        if loaded > 0 {
            info!("Pre-warmed {} collections", loaded);
        }
        loaded
    }

    /// Evicts resident indices if the process is over its memory ceiling.
    pub async fn enforce_memory_ceiling(&self) -> Vec<String> {
        self.inner
            .resident
            .lock()
            .await
            .make_room(self.inner.probe.as_ref())
    }

    /// The `k` chunks nearest to `vector`, closest first.
    ///
    /// Never fails: a missing index, a failed job or a bad query all produce an
    /// empty result, logged.
    pub async fn search(&self, collection: &str, vector: &[f32], k: usize) -> Vec<SearchHit> {
        let started = Instant::now();
        if k == 0 || vector.is_empty() {
            return Vec::new();
        }

        // A write that lands while the job runs bumps the generation, and the
        // job's result is then not cached.
        let (cached, generation) = {
            let mut cache = self.inner.cache.lock().await;
            (cache.get(collection, vector, k), cache.generation(collection))
        };
        if let Some(hits) = cached {
            debug!(collection = %collection, k, "Search cache hit");
            self.after_search(collection, started).await;
            return hits;
        }

        let reply = self
            .inner
            .runner
            .dispatch(JobRequest::Search {
                collection: collection.to_string(),
                vector: vector.to_vec(),
                k,
                ef_search: self.inner.config.ef_search,
            })
            .await;

        match reply {
            JobReply::Found { hits } => {
                let cached = self.inner.cache.lock().await.insert_if_current(
                    collection,
                    generation,
                    vector,
                    k,
                    hits.clone(),
                );
                if !cached {
                    debug!(collection = %collection, "Index changed during search, result not cached");
                }
                self.after_search(collection, started).await;
                hits
            }
            JobReply::Failed {
                error: IndexError::IndexMissingOrCorrupt { reason, .. },
                ..
            } => {
                debug!(collection = %collection, "Search miss: {}", reason);
                Vec::new()
            }
            JobReply::Failed {
                error: err @ IndexError::DimensionMismatch { .. },
                ..
            } => {
                warn!(collection = %collection, "Search rejected: {}", err);
                Vec::new()
            }
            JobReply::Failed { job, error } => {
                error!(collection = %collection, "Search job '{}' failed: {}", job, error);
                Vec::new()
            }
            other => {
                error!(collection = %collection, "{}", unexpected_reply("search", &other));
                Vec::new()
            }
        }
    }

    async fn after_search(&self, collection: &str, started: Instant) {
        self.inner.stats.lock().await.record(started.elapsed());
        self.inner.resident.lock().await.touch(collection);
        self.inner.usage.tracker().lock().await.record(collection);
        self.inner
            .usage_marks
            .get_or_init(|| self.inner.usage.spawn_writer())
            .send_modify(|marks| *marks = marks.wrapping_add(1));
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        let names: Vec<String> = self
            .inner
            .manifest
            .lock()
            .await
            .collections()
            .map(str::to_string)
            .collect();

        let (resident_collections, mut collections) = {
            let resident = self.inner.resident.lock().await;
            let collections: Vec<CollectionHealth> = names
                .into_iter()
                .map(|name| {
                    let resident_index = resident.get(&name);
                    let chunks = resident_index
                        .map(|index| index.map.len())
                        .or_else(|| self.inner.store.load_meta(&name).map(|m| m.chunk_count))
                        .unwrap_or(0);
                    CollectionHealth {
                        resident: resident_index.is_some(),
                        chunks,
                        name,
                    }
                })
                .collect();
            (resident.names(), collections)
        };
        collections.retain(|c| c.resident || self.inner.store.has_map(&c.name));

        let cache_stats = self.inner.cache.lock().await.stats();
        let stats = self.inner.stats.lock().await;
        HealthStatus {
            total_indices: collections.len(),
            total_chunks: collections.iter().map(|c| c.chunks).sum(),
            avg_search_time_ms: stats.avg_ms(),
            cache_hit_rate: cache_stats.hit_rate,
            cache_stats,
            resident_collections,
            searches: stats.searches,
            collections,
        }
    }

    /// Stops the watcher, waits for running writes and persists usage stats.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(watcher) = self.inner.watcher.lock().await.take() {
            watcher.stop().await;
        }
        loop {
            let notified = self.inner.in_flight_done.notified();
            let running = self.inner.in_flight_count();
            if running == 0 {
                break;
            }
            debug!("Waiting for {} in-flight writes", running);
            notified.await;
        }
        self.inner.usage.flush().await?;
        info!("Index manager shut down");
        Ok(())
    }
}

fn unexpected_reply(job: impl Into<String>, reply: &JobReply) -> IndexError {
    IndexError::worker(job, format!("unexpected reply {reply:?}"))
}

#[async_trait]
impl ChangeHandler for IndexManager {
    async fn collection_changed(&self, collection: String) {
        match self.sync_collection(&collection).await {
            SyncOutcome::Failed(_) | SyncOutcome::Unchanged | SyncOutcome::InFlight => {}
            outcome => info!(collection = %collection, ?outcome, "Applied file changes"),
        }
    }
}

/// Handler given to the watcher. It only holds a weak reference, so a
/// manager dropped without [`IndexManager::shutdown`] is still freed.
struct WatchHandler {
    inner: Weak<Inner>,
}

#[async_trait]
impl ChangeHandler for WatchHandler {
    async fn collection_changed(&self, collection: String) {
        match self.inner.upgrade() {
            Some(inner) => IndexManager { inner }.collection_changed(collection).await,
            None => debug!(collection = %collection, "Manager dropped, ignoring change"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdex_embed::HashEmbeddingProvider;
    use tempfile::{TempDir, tempdir};

    fn manager(root: &TempDir, store: &TempDir) -> anyhow::Result<IndexManager> {
        let config = IndexConfig::new(root.path(), store.path());
        Ok(IndexManager::builder(config)
            .with_provider(Arc::new(HashEmbeddingProvider::new(32)?))
            .build()?)
    }

    #[tokio::test]
    async fn test_in_flight_guard_is_single_flight() -> anyhow::Result<()> {
        let (root, store) = (tempdir()?, tempdir()?);
        let manager = manager(&root, &store)?;

        let guard = manager.inner.try_begin("notes");
        assert!(guard.is_some());
        assert!(matches!(
            manager.sync_collection("notes").await,
            SyncOutcome::InFlight
        ));
        assert!(manager.inner.try_begin("other").is_some());
        drop(guard);
        assert_eq!(manager.inner.in_flight_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_root_syncs_nothing() -> anyhow::Result<()> {
        let (root, store) = (tempdir()?, tempdir()?);
        let manager = manager(&root, &store)?;
        assert!(manager.sync_all().await?.is_empty());

        let health = manager.get_health_status().await;
        assert_eq!(health.total_indices, 0);
        assert_eq!(health.avg_search_time_ms, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_removed_collection() -> anyhow::Result<()> {
        let (root, store) = (tempdir()?, tempdir()?);
        let manager = manager(&root, &store)?;
        assert!(matches!(
            manager.sync_collection("vanished").await,
            SyncOutcome::Removed
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_watching_manager_is_freed_when_dropped() -> anyhow::Result<()> {
        let (root, store) = (tempdir()?, tempdir()?);
        let manager = manager(&root, &store)?;
        manager.initialize().await?;

        let inner = Arc::downgrade(&manager.inner);
        drop(manager);
        assert!(inner.upgrade().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_search_does_not_wait_for_usage_writes() -> anyhow::Result<()> {
        let (root, store) = (tempdir()?, tempdir()?);
        std::fs::create_dir_all(root.path().join("notes"))?;
        std::fs::write(
            root.path().join("notes/a.txt"),
            "Rivers carry water. Bees make honey.",
        )?;
        let manager = manager(&root, &store)?;
        manager.sync_collection("notes").await;
        let query = HashEmbeddingProvider::new(32)?.embed("rivers");

        let slot = manager.inner.usage.write_slot().lock().await;
        for _ in 0..3 {
            let hits = tokio::time::timeout(
                Duration::from_secs(5),
                manager.search("notes", &query, 1),
            )
            .await?;
            assert_eq!(hits.len(), 1);
        }
        drop(slot);

        manager.shutdown().await?;
        let usage = UsageTracker::load(&store.path().join("usage_stats.json"));
        assert_eq!(usage.get("notes").map(|r| r.frequency), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_persists_usage() -> anyhow::Result<()> {
        let (root, store) = (tempdir()?, tempdir()?);
        let manager = manager(&root, &store)?;
        manager.shutdown().await?;
        assert!(store.path().join("usage_stats.json").exists());
        Ok(())
    }
}
