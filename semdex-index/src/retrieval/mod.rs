//! Change detection, index maintenance, workers and the query path.
//!
//! [`index_manager::IndexManager`] is the entry point; the other modules are
//! its parts and are public so they can be driven and tested on their own.

pub mod change_detector;
pub mod directory_watcher;
pub mod documents;
pub mod index_builder;
pub mod index_manager;
pub mod job_worker;
pub mod memory;
pub mod search_cache;
pub mod usage;
