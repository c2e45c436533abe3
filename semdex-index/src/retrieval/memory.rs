//! Resident (in-memory) collection indices and their LRU eviction.

use crate::storage::index_store::LoadedIndex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{info, warn};

/// Eviction stops once usage is below this fraction of the ceiling.
pub const EVICTION_TARGET: f64 = 0.8;

/// Reports how much memory the process is using.
pub trait MemoryProbe: Send + Sync {
    fn used_bytes(&self) -> u64;
}

/// Resident set size of the current process, via `sysinfo`.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!("Cannot determine own pid, memory ceiling disabled: {}", e))
            .ok();
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let Ok(mut system) = self.system.lock() else {
            return 0;
        };
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map_or(0, |p| p.memory())
    }
}

struct Resident {
    index: LoadedIndex,
    last_accessed: Instant,
}

/// Collection indices held in memory, keyed by collection name.
///
/// A collection being written is taken out of the set for the duration of the
/// write, so eviction can never pull an index out from under an update.
pub struct ResidentSet {
    entries: HashMap<String, Resident>,
    ceiling_bytes: u64,
}

impl ResidentSet {
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ceiling_bytes,
        }
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.entries.contains_key(collection)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resident collection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, collection: &str) -> Option<&LoadedIndex> {
        self.entries.get(collection).map(|r| &r.index)
    }

    /// Marks `collection` as just used.
    pub fn touch(&mut self, collection: &str) {
        if let Some(resident) = self.entries.get_mut(collection) {
            resident.last_accessed = Instant::now();
        }
    }

    /// Removes and returns the resident copy, e.g. to apply an update to it.
    pub fn take(&mut self, collection: &str) -> Option<LoadedIndex> {
        self.entries.remove(collection).map(|r| r.index)
    }

    pub fn put(&mut self, collection: &str, index: LoadedIndex) {
        self.entries.insert(
            collection.to_string(),
            Resident {
                index,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Estimated bytes held by all resident indices.
    pub fn estimated_bytes(&self) -> u64 {
        self.entries.values().map(|r| r.index.estimated_bytes()).sum()
    }

    /// Evicts least recently used indices while the process is over its ceiling.
    ///
    /// Called before loading another index. Process memory is not returned to
    /// the OS promptly, so progress is tracked by subtracting each evicted
    /// index's estimated size from the probe's reading. Returns the evicted
    /// collection names, oldest first.
    pub fn make_room(&mut self, probe: &dyn MemoryProbe) -> Vec<String> {
        let mut used = probe.used_bytes();
        if used <= self.ceiling_bytes {
            return Vec::new();
        }

        let target = (self.ceiling_bytes as f64 * EVICTION_TARGET) as u64;
        let mut by_age: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|(name, r)| (r.last_accessed, name.clone()))
            .collect();
        by_age.sort();

        let mut evicted = Vec::new();
        for (_, name) in by_age {
            if used < target {
                break;
            }
            if let Some(resident) = self.entries.remove(&name) {
                let freed = resident.index.estimated_bytes();
                used = used.saturating_sub(freed);
                info!(collection = %name, freed_bytes = freed, "Evicted resident index");
                evicted.push(name);
            }
        }
        evicted
    }
}
