//! Fixed-horizon bucket sequence and its roll-up math
//!
//! Pure data structure: population, projection sums and the slide/purge
//! operations are all deterministic functions of the inputs, with no clock
//! access. The aggregator supplies "now" explicitly.

use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::transport::UserContext;
use crate::types::{ItemKind, Level, ReviewItem, Tier};

// ============================================================================
// Snapshots
// ============================================================================

/// Per-level counters inside one bucket
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LevelSnapshot {
    tiers: [u32; Tier::COUNT],
    kinds: [u32; 3],
}

impl LevelSnapshot {
    /// Count one contributing item
    pub fn bump(&mut self, tier: Tier, kind: ItemKind) {
        self.tiers[tier.index()] += 1;
        self.kinds[kind.index()] += 1;
    }

    /// Items at the given tier
    pub fn tier_count(&self, tier: Tier) -> u32 {
        self.tiers[tier.index()]
    }

    /// Items of the given kind
    pub fn kind_count(&self, kind: ItemKind) -> u32 {
        self.kinds[kind.index()]
    }

    /// Items in this snapshot (each item counts once)
    pub fn total(&self) -> u32 {
        self.kinds.iter().sum()
    }
}

// ============================================================================
// Buckets
// ============================================================================

/// One fixed-width time bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineBucket {
    /// Bucket start, aligned to the series width
    pub start: DateTime<Utc>,

    /// Tick-mark label; present only on 30-minute boundaries
    pub label: Option<String>,

    /// Counters keyed by item level
    pub per_level: BTreeMap<Level, LevelSnapshot>,
}

impl TimelineBucket {
    fn new(start: DateTime<Utc>) -> Self {
        let label = if start.minute() % 30 == 0 && start.second() == 0 {
            Some(start.format("%H:%M").to_string())
        } else {
            None
        };
        Self {
            start,
            label,
            per_level: BTreeMap::new(),
        }
    }

    /// Items across all levels in this bucket
    pub fn total(&self) -> u32 {
        self.per_level.values().map(LevelSnapshot::total).sum()
    }

    /// Counters for one level, if any item of that level landed here
    pub fn snapshot(&self, level: Level) -> Option<&LevelSnapshot> {
        self.per_level.get(&level)
    }
}

// ============================================================================
// Series
// ============================================================================

/// Fixed-length, fixed-width, strictly increasing bucket sequence
///
/// Invariant: `buckets[i].start == origin + i * width` at all times,
/// including across slides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSeries {
    origin: DateTime<Utc>,
    width: Duration,
    buckets: Vec<TimelineBucket>,
}

impl BucketSeries {
    /// Build an empty horizon, quantizing `now` down to the nearest width
    /// boundary
    pub fn new(now: DateTime<Utc>, width: Duration, horizon: usize) -> Self {
        let width_secs = width.num_seconds().max(1);
        let quantized = now.timestamp().div_euclid(width_secs) * width_secs;
        let origin = DateTime::<Utc>::from_timestamp(quantized, 0).unwrap_or(now);

        let buckets = (0..horizon)
            .map(|i| TimelineBucket::new(origin + width * i as i32))
            .collect();

        Self {
            origin,
            width,
            buckets,
        }
    }

    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    pub fn width(&self) -> Duration {
        self.width
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The bucket sequence, oldest first
    pub fn buckets(&self) -> &[TimelineBucket] {
        &self.buckets
    }

    /// Bucket index for an availability instant
    ///
    /// Instants before the first bucket clamp into it; instants beyond the
    /// horizon return `None` and are not represented.
    pub fn bucket_index(&self, at: DateTime<Utc>) -> Option<usize> {
        let width_secs = self.width.num_seconds().max(1);
        let delta = at.signed_duration_since(self.origin).num_seconds();
        let index = delta.div_euclid(width_secs).max(0);
        if (index as usize) < self.buckets.len() {
            Some(index as usize)
        } else {
            None
        }
    }

    /// Count one item into its bucket; returns whether it was represented
    ///
    /// Items with no availability timestamp or at the terminal tier never
    /// contribute.
    pub fn record<T: ReviewItem>(&mut self, item: &T) -> bool {
        let Some(at) = item.available_at() else {
            return false;
        };
        if item.tier().is_terminal() {
            return false;
        }
        let Some(index) = self.bucket_index(at) else {
            return false;
        };
        self.buckets[index]
            .per_level
            .entry(item.level())
            .or_default()
            .bump(item.tier(), item.kind());
        true
    }

    /// Count a whole library; returns how many items were represented
    pub fn record_library<T: ReviewItem>(&mut self, items: &[T]) -> usize {
        items.iter().filter(|item| self.record(*item)).count()
    }

    /// Total across every bucket
    pub fn total(&self) -> u32 {
        self.buckets.iter().map(TimelineBucket::total).sum()
    }

    // ------------------------------------------------------------------
    // Elapsed accounting
    // ------------------------------------------------------------------

    /// Buckets whose whole width has passed; this is the slide amount
    pub fn fully_elapsed(&self, now: DateTime<Utc>) -> usize {
        self.buckets
            .iter()
            .take_while(|b| b.start + self.width <= now)
            .count()
    }

    /// Levels appearing in any bucket whose start time has passed
    ///
    /// These buckets' contents may be stale; they feed the relocation level
    /// set.
    pub fn started_levels(&self, now: DateTime<Utc>) -> BTreeSet<Level> {
        self.buckets
            .iter()
            .take_while(|b| b.start <= now)
            .flat_map(|b| b.per_level.keys().copied())
            .collect()
    }

    /// Items in fully elapsed buckets: the locally known "available now"
    pub fn available_total(&self, now: DateTime<Utc>) -> u32 {
        self.buckets[..self.fully_elapsed(now)]
            .iter()
            .map(TimelineBucket::total)
            .sum()
    }

    /// Items in not-yet-elapsed buckets starting before `until`
    pub fn upcoming_total(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> u32 {
        self.buckets[self.fully_elapsed(now)..]
            .iter()
            .filter(|b| b.start < until)
            .map(TimelineBucket::total)
            .sum()
    }

    // ------------------------------------------------------------------
    // Drift check
    // ------------------------------------------------------------------

    /// Cross-check local short-horizon projections against the server's
    ///
    /// Each local projection is the already-available portion plus the
    /// upcoming buckets inside the window, matching how the service counts
    /// currently available items into its projections. Requires exact
    /// equality on both windows; any mismatch is drift.
    pub fn is_consistent(&self, ctx: &UserContext, now: DateTime<Utc>) -> bool {
        let available = self.available_total(now);
        let hour = available + self.upcoming_total(now, now + Duration::hours(1));
        let day = available + self.upcoming_total(now, now + Duration::hours(24));
        hour == ctx.next_hour_projected && day == ctx.next_day_projected
    }

    // ------------------------------------------------------------------
    // Relocation support
    // ------------------------------------------------------------------

    /// Drop `count` buckets from the front and append fresh empty ones,
    /// preserving length, width and start alignment
    pub fn slide(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let horizon = self.buckets.len();
        let drop = count.min(horizon);
        self.buckets.drain(..drop);
        self.origin = self.origin + self.width * count as i32;

        // Re-derive every start from the new origin so a slide past the whole
        // horizon still lands aligned
        while self.buckets.len() < horizon {
            let index = self.buckets.len();
            self.buckets
                .push(TimelineBucket::new(self.origin + self.width * index as i32));
        }
    }

    /// Remove the given levels' counters from every bucket; other levels'
    /// entries stay exactly as they were
    pub fn purge_levels(&mut self, levels: &BTreeSet<Level>) {
        for bucket in &mut self.buckets {
            for level in levels {
                bucket.per_level.remove(level);
            }
        }
    }
}
