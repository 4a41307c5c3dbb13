//! Per-kind level cache with partial-hit lookups
//!
//! Callers routinely request a contiguous level range of which only a subset
//! is cold; `get_missing` partitions such a request so the coordinator
//! fetches only the missing levels. This partial-hit behavior is why this is
//! not a plain map.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::types::{Level, ReviewItem};

// ============================================================================
// Entries
// ============================================================================

/// Validity of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// A complete fetch succeeded for this level
    Good,
    /// No complete fetch has happened for this level
    Missing,
}

/// A single level's cached snapshot
///
/// Never partially populated: an entry is `Good` only after a complete
/// successful fetch for its level, and `Missing` entries hold no items.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// Whether this entry represents a completed fetch
    pub quality: Quality,

    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,

    /// The level's items, in service order; empty for `Missing`
    pub items: Vec<T>,
}

impl<T> CacheEntry<T> {
    /// Synthesized entry for a level that has never been fetched
    pub fn missing() -> Self {
        Self {
            quality: Quality::Missing,
            fetched_at: Utc::now(),
            items: Vec::new(),
        }
    }

    /// True when this entry holds a completed snapshot
    pub fn is_good(&self) -> bool {
        self.quality == Quality::Good
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected by a single level cache
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Levels answered from cache during `get_missing`
    pub hits: u64,

    /// Levels reported missing during `get_missing`
    pub misses: u64,

    /// Level entries written by `put`
    pub puts: u64,
}

// ============================================================================
// Level Cache
// ============================================================================

/// Mapping from level number to cached snapshot for one item kind
///
/// Levels not present are implicitly `Missing`. Once a level is `Good`, later
/// writes may only replace it with a newer complete snapshot; nothing here
/// ever downgrades a level back to `Missing`.
#[derive(Debug)]
pub struct LevelCache<T> {
    entries: HashMap<Level, CacheEntry<T>>,
    stats: CacheStats,
}

impl<T> Default for LevelCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<T: ReviewItem> LevelCache<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a single level; never fails
    ///
    /// Returns a synthesized `Missing` entry for levels that have never been
    /// fetched.
    pub fn get(&self, level: Level) -> CacheEntry<T> {
        self.entries
            .get(&level)
            .cloned()
            .unwrap_or_else(CacheEntry::missing)
    }

    /// Partition a level set into cached and missing
    ///
    /// Items for already-`Good` levels are merged into the returned
    /// accumulator in ascending level order; the second element is exactly
    /// the subset the caller still needs to fetch.
    pub fn get_missing(&mut self, levels: &BTreeSet<Level>) -> (Vec<T>, BTreeSet<Level>) {
        let mut accumulator = Vec::new();
        let mut missing = BTreeSet::new();

        for &level in levels {
            match self.entries.get(&level) {
                Some(entry) if entry.is_good() => {
                    self.stats.hits += 1;
                    accumulator.extend(entry.items.iter().cloned());
                }
                _ => {
                    self.stats.misses += 1;
                    missing.insert(level);
                }
            }
        }

        (accumulator, missing)
    }

    /// Store a snapshot of items spanning any mix of levels
    ///
    /// Items are grouped by level; each represented level gets a fresh `Good`
    /// entry holding exactly that level's items. Levels absent from the
    /// snapshot are left untouched.
    pub fn put(&mut self, snapshot: Vec<T>) {
        if snapshot.is_empty() {
            return;
        }

        let fetched_at = Utc::now();
        let mut grouped: HashMap<Level, Vec<T>> = HashMap::new();
        for item in snapshot {
            grouped.entry(item.level()).or_default().push(item);
        }

        for (level, items) in grouped {
            self.stats.puts += 1;
            self.entries.insert(
                level,
                CacheEntry {
                    quality: Quality::Good,
                    fetched_at,
                    items,
                },
            );
        }
    }

    /// Levels currently holding a `Good` entry
    pub fn good_levels(&self) -> BTreeSet<Level> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_good())
            .map(|(&l, _)| l)
            .collect()
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
