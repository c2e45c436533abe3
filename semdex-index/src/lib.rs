//! semdex-index: incremental semantic indices over directories of text
//!
//! Each subdirectory of the documents root is a collection. Its documents are
//! chunked, embedded and stored in a persistent HNSW graph; later edits are
//! applied incrementally by diffing content-addressed chunk hashes, falling
//! back to a full rebuild when too much changed.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: the [`IndexManager`] orchestrator, change detection,
//!   one-shot job workers, LRU residency, result cache and file watching
//! - **[`storage`]**: manifest, chunk maps and ANN graphs on disk
//! - **[`config`]**: layered configuration (defaults, TOML, environment)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use semdex_index::{IndexConfig, IndexManager};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IndexConfig::from_env();
//! let manager = IndexManager::builder(config).build()?;
//! manager.initialize().await?;
//!
//! let hits = manager.search("notes", &[0.1, 0.2, 0.3], 5).await;
//! for hit in hits {
//!     println!("{:.3} {} {}", hit.distance, hit.source_file, hit.text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! DirectoryWatcher → IndexManager → change_detector → JobRunner (rebuild / embed)
//!                         ↓                                   ↓
//!                  SearchCache ← search ← JobRunner (search) ← IndexStore (disk)
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use retrieval::index_manager::{HealthStatus, IndexManager, IndexManagerBuilder, SyncOutcome};
pub use retrieval::job_worker::SearchHit;
