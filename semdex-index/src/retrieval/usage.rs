//! Per-collection search counters, persisted as `usage_stats.json`.

use crate::Result;
use crate::storage::write_json_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub frequency: u64,
    /// Unix epoch milliseconds
    pub last_accessed: i64,
}

#[derive(Debug, Default)]
pub struct UsageTracker {
    path: PathBuf,
    records: BTreeMap<String, UsageRecord>,
}

impl UsageTracker {
    /// Loads usage stats; a missing or unreadable file starts from zero.
    pub fn load(path: &Path) -> Self {
        let records = std::fs::read(path)
            .ok()
            .and_then(|bytes| match serde_json::from_slice(&bytes) {
                Ok(records) => Some(records),
                Err(e) => {
                    tracing::warn!("Ignoring corrupt usage stats {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            records,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counts one successful search of `collection`.
    pub fn record(&mut self, collection: &str) {
        let entry = self.records.entry(collection.to_string()).or_default();
        entry.frequency += 1;
        entry.last_accessed = chrono::Utc::now().timestamp_millis();
    }

    pub fn get(&self, collection: &str) -> Option<UsageRecord> {
        self.records.get(collection).copied()
    }

    /// The `n` most searched collections, most frequent first; ties go to the
    /// most recently used.
    pub fn hottest(&self, n: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, &UsageRecord)> = self.records.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.frequency
                .cmp(&a.frequency)
                .then(b.last_accessed.cmp(&a.last_accessed))
        });
        ranked.into_iter().take(n).map(|(name, _)| name.clone()).collect()
    }

    /// Serialized copy of the records, for writing off the control path.
    pub fn snapshot(&self) -> BTreeMap<String, UsageRecord> {
        self.records.clone()
    }

    pub fn save(&self) -> Result<()> {
        write_usage(&self.path, &self.records)
    }
}

pub fn write_usage(path: &Path, records: &BTreeMap<String, UsageRecord>) -> Result<()> {
    write_json_atomic(path, records)
}

/// Shared [`UsageTracker`] plus the machinery that writes it to disk.
///
/// The tracker lock is only held to record or snapshot, never across a
/// write. Writes are serialized, and each one snapshots after it owns the
/// write slot, so a later write never carries older counts than an earlier one.
#[derive(Clone)]
pub struct UsagePersister {
    tracker: Arc<Mutex<UsageTracker>>,
    write_slot: Arc<Mutex<()>>,
}

impl UsagePersister {
    pub fn new(tracker: UsageTracker) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            write_slot: Arc::new(Mutex::new(())),
        }
    }

    pub fn tracker(&self) -> &Mutex<UsageTracker> {
        &self.tracker
    }

    /// Writes the current counts.
    pub async fn flush(&self) -> Result<()> {
        let _slot = self.write_slot.lock().await;
        let (path, snapshot) = {
            let tracker = self.tracker.lock().await;
            (tracker.path().to_path_buf(), tracker.snapshot())
        };
        tokio::task::spawn_blocking(move || write_usage(&path, &snapshot)).await?
    }

    /// Starts a background writer that flushes after each mark. Marks that
    /// arrive while a write is running collapse into one follow-up write.
    /// The writer exits once the returned sender is dropped.
    pub fn spawn_writer(&self) -> watch::Sender<u64> {
        let (marks, mut pending) = watch::channel(0u64);
        let persister = self.clone();
        tokio::spawn(async move {
            // `changed` marks the value seen, so marks sent during a flush
            // wake the loop exactly once more.
            while pending.changed().await.is_ok() {
                if let Err(err) = persister.flush().await {
                    tracing::warn!("Failed to persist usage stats: {}", err);
                }
            }
            tracing::debug!("Usage writer stopped");
        });
        marks
    }

    #[cfg(test)]
    pub(crate) fn write_slot(&self) -> &Mutex<()> {
        &self.write_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_save_and_reload() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("usage_stats.json");

        let mut usage = UsageTracker::load(&path);
        usage.record("notes");
        usage.record("notes");
        usage.record("recipes");
        usage.save()?;

        let reloaded = UsageTracker::load(&path);
        let notes = reloaded.get("notes").unwrap();
        assert_eq!(notes.frequency, 2);
        assert!(notes.last_accessed > 0);

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(raw["recipes"]["frequency"], 1);
        assert!(raw["recipes"]["lastAccessed"].is_i64());
        Ok(())
    }

    #[test]
    fn test_hottest_orders_by_frequency() {
        let mut usage = UsageTracker::default();
        for _ in 0..3 {
            usage.record("b");
        }
        usage.record("a");
        usage.record("c");
        usage.record("c");

        assert_eq!(usage.hottest(2), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(usage.hottest(10).len(), 3);
        assert!(usage.hottest(0).is_empty());
    }

    #[tokio::test]
    async fn test_writer_coalesces_marks_and_writes_latest_counts() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("usage_stats.json");
        let persister = UsagePersister::new(UsageTracker::load(&path));
        let marks = persister.spawn_writer();

        {
            // Writes wait for the slot; recording does not
            let _slot = persister.write_slot().lock().await;
            for _ in 0..50 {
                persister.tracker().lock().await.record("notes");
                marks.send_modify(|n| *n += 1);
            }
        }

        let mut frequency = 0;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            frequency = UsageTracker::load(&path).get("notes").map_or(0, |r| r.frequency);
            if frequency == 50 {
                break;
            }
        }
        assert_eq!(frequency, 50);
        drop(marks);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_starts_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("usage_stats.json");
        std::fs::write(&path, "{not json")?;
        assert!(UsageTracker::load(&path).hottest(5).is_empty());
        Ok(())
    }
}
