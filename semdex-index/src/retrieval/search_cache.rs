//! Bounded, time-limited cache of search results.

use crate::retrieval::job_worker::SearchHit;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// (collection, blake3 of the query vector, k)
type CacheKey = (String, String, usize);

struct CacheEntry {
    hits: Vec<SearchHit>,
    inserted: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// FIFO-evicting result cache.
///
/// Entries expire `ttl` after insertion and are dropped per collection when
/// that collection's index changes. Each invalidation also bumps the
/// collection's generation; results computed against an older generation are
/// refused by [`SearchCache::insert_if_current`].
pub struct SearchCache {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    generations: HashMap<String, u64>,
    capacity: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

/// Digest of the query vector's little-endian bytes.
pub fn vector_digest(vector: &[f32]) -> String {
    let mut hasher = blake3::Hasher::new();
    for value in vector {
        hasher.update(&value.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            generations: HashMap::new(),
            capacity,
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    fn key(collection: &str, vector: &[f32], k: usize) -> CacheKey {
        (collection.to_string(), vector_digest(vector), k)
    }

    /// Cached hits for the query, if present and fresh. Counts a hit or a miss.
    pub fn get(&mut self, collection: &str, vector: &[f32], k: usize) -> Option<Vec<SearchHit>> {
        let key = Self::key(collection, vector, k);
        let fresh = match self.entries.get(&key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.hits.clone()),
            Some(_) => {
                self.remove(&key);
                None
            }
            None => None,
        };
        match fresh {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        fresh
    }

    pub fn insert(&mut self, collection: &str, vector: &[f32], k: usize, hits: Vec<SearchHit>) {
        if self.capacity == 0 {
            return;
        }
        let key = Self::key(collection, vector, k);
        if self.entries.contains_key(&key) {
            self.remove(&key);
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                hits,
                inserted: Instant::now(),
            },
        );
    }

    /// Number of invalidations `collection` has seen.
    pub fn generation(&self, collection: &str) -> u64 {
        self.generations.get(collection).copied().unwrap_or(0)
    }

    /// Caches `hits` only if `collection` was not invalidated since
    /// `generation` was read. Returns whether the hits were cached.
    pub fn insert_if_current(
        &mut self,
        collection: &str,
        generation: u64,
        vector: &[f32],
        k: usize,
        hits: Vec<SearchHit>,
    ) -> bool {
        if self.generation(collection) != generation {
            return false;
        }
        self.insert(collection, vector, k, hits);
        true
    }

    /// Drops every entry for `collection` and bumps its generation. Returns
    /// how many entries were removed.
    pub fn invalidate_collection(&mut self, collection: &str) -> usize {
        *self.generations.entry(collection.to_string()).or_default() += 1;
        let before = self.entries.len();
        self.entries.retain(|(name, _, _), _| name != collection);
        self.order.retain(|(name, _, _)| name != collection);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}
