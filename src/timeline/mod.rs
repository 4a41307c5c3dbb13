//! Timeline aggregator
//!
//! Maintains the rolling 48-hour, 15-minute-bucketed forecast of "item
//! becomes reviewable" events and keeps it consistent with the service's own
//! short-horizon projections. It participates in general fetch cycles as a
//! regular consumer; on every externally reported refresh it re-validates its
//! committed buckets against the authoritative counters and, on drift, heals
//! itself with a relocation: a targeted re-fetch of only the levels that may
//! have gone stale, followed by a slide of the elapsed buckets.

mod buckets;
pub use buckets::{BucketSeries, LevelSnapshot, TimelineBucket};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::consumer::{BuildSlot, FetchConsumer, Promotion};
use crate::coordinator::{FetchCoordinator, FetchRequest, FetchSnapshot};
use crate::error::{Error, Result};
use crate::transport::{ItemSource, UsageMeter, UserContext};
use crate::types::{
    CompositeItem, CompoundItem, ItemKind, KindSet, Level, Library, PrimitiveItem,
};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the timeline aggregator
#[derive(Debug, Clone)]
pub struct TimelineConfig {
    /// Width of one bucket
    pub bucket_width: Duration,

    /// Number of buckets in the horizon
    pub horizon_buckets: usize,

    /// Minimum remaining look-ahead, in buckets, below which a relocation is
    /// pointless and the aggregator rebuilds from scratch instead
    pub min_lookahead_buckets: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            bucket_width: Duration::minutes(15),
            horizon_buckets: 192, // 48 hours
            min_lookahead_buckets: 16,
        }
    }
}

impl TimelineConfig {
    /// Reject configurations the bucket math cannot support
    pub fn validate(&self) -> Result<()> {
        if self.bucket_width <= Duration::zero() {
            return Err(Error::Configuration(
                "bucket width must be positive".to_string(),
            ));
        }
        if self.horizon_buckets == 0 {
            return Err(Error::Configuration(
                "horizon must hold at least one bucket".to_string(),
            ));
        }
        if self.min_lookahead_buckets > self.horizon_buckets {
            return Err(Error::Configuration(
                "minimum look-ahead cannot exceed the horizon".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Surface
// ============================================================================

/// Presentation surface for the forecast histogram
pub trait TimelineSurface: Send + Sync {
    /// Render the committed bucket series
    fn render(&self, series: &BucketSeries);

    /// The backing fetch aborted; keep showing stale data with an error mark
    fn render_error(&self);
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected by the aggregator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimelineStats {
    /// Refresh checks that found local and server projections equal
    pub consistent_checks: u64,

    /// Drift detections that led to a level-scoped relocation
    pub relocations: u64,

    /// Relocation results discarded as superseded
    pub relocations_discarded: u64,

    /// Relocation fetches that failed and were swallowed
    pub relocations_failed: u64,

    /// Drift detections that fell back to a full rebuild
    pub full_rebuilds: u64,
}

// ============================================================================
// Aggregator
// ============================================================================

/// Committed / building forecast state
#[derive(Debug)]
struct TimelineState {
    series: BucketSeries,
}

struct AggregatorInner {
    slot: BuildSlot<TimelineState>,
    surface: Option<Arc<dyn TimelineSurface>>,
    /// Identity token of the currently authoritative relocation; results
    /// carrying an older token are discarded at completion time
    relocation_token: u64,
    stats: TimelineStats,
}

enum HealPlan {
    /// Projections match; nothing to do
    None,
    /// Level-scoped relocation
    Relocate {
        levels: BTreeSet<Level>,
        token: u64,
    },
    /// Remaining horizon too short; discard everything and refetch fully
    FullRebuild,
}

/// Builds and self-heals the bucketed review forecast
pub struct TimelineAggregator {
    config: TimelineConfig,
    coordinator: Arc<FetchCoordinator>,
    source: Arc<dyn ItemSource>,
    meter: Arc<dyn UsageMeter>,
    inner: Mutex<AggregatorInner>,
}

impl TimelineAggregator {
    /// Create the aggregator and register it with the coordinator
    pub fn register(
        coordinator: Arc<FetchCoordinator>,
        source: Arc<dyn ItemSource>,
        meter: Arc<dyn UsageMeter>,
        config: TimelineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let aggregator = Arc::new(Self {
            config,
            coordinator,
            source,
            meter,
            inner: Mutex::new(AggregatorInner {
                slot: BuildSlot::new(KindSet::all()),
                surface: None,
                relocation_token: 0,
                stats: TimelineStats::default(),
            }),
        });
        aggregator
            .coordinator
            .add_consumer(aggregator.clone() as Arc<dyn FetchConsumer>);
        Ok(aggregator)
    }

    /// Attach a presentation surface; does not itself trigger a fetch
    pub fn bind(&self, surface: Arc<dyn TimelineSurface>) {
        let mut inner = self.inner.lock();
        inner.surface = Some(surface.clone());
        if let Some(committed) = inner.slot.committed() {
            if committed.errored {
                surface.render_error();
            } else {
                surface.render(&committed.state.series);
            }
        }
    }

    /// Detach the presentation surface
    pub fn unbind(&self) {
        self.inner.lock().surface = None;
    }

    /// Discard all committed and building bucket state
    ///
    /// Also invalidates any in-flight relocation: its result will compare an
    /// old token and be discarded.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.slot.flush();
        inner.relocation_token += 1;
    }

    /// Render from committed state if present, otherwise request a fetch
    pub fn load_data(self: &Arc<Self>) {
        let rendered = {
            let inner = self.inner.lock();
            match inner.slot.committed() {
                Some(committed) if !committed.errored => {
                    if let Some(surface) = &inner.surface {
                        surface.render(&committed.state.series);
                    }
                    true
                }
                _ => false,
            }
        };
        if !rendered {
            self.coordinator.request(FetchRequest {
                meter: self.meter.clone(),
                kinds: KindSet::all(),
            });
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> TimelineStats {
        self.inner.lock().stats
    }

    /// The committed bucket series, if promoted
    pub fn committed_series(&self) -> Option<BucketSeries> {
        let inner = self.inner.lock();
        inner
            .slot
            .committed()
            .filter(|c| !c.errored)
            .map(|c| c.state.series.clone())
    }

    // ------------------------------------------------------------------
    // Drift check & healing
    // ------------------------------------------------------------------

    /// Re-validate against authoritative projections; heal on drift
    ///
    /// Called on every externally reported refresh. Consistent state is a
    /// strict no-op: no fetch is issued and the buckets are untouched.
    pub fn refresh(self: &Arc<Self>, ctx: &UserContext) {
        self.refresh_at(ctx, Utc::now());
    }

    /// `refresh` with an explicit clock, the testable entry point
    pub fn refresh_at(self: &Arc<Self>, ctx: &UserContext, now: DateTime<Utc>) {
        let plan = {
            let mut inner = self.inner.lock();
            let Some(committed) = inner.slot.committed() else {
                return;
            };
            if committed.errored {
                return;
            }

            let series = &committed.state.series;
            if series.is_consistent(ctx, now) {
                inner.stats.consistent_checks += 1;
                tracing::debug!("Timeline consistent with server projections");
                HealPlan::None
            } else {
                let elapsed = series.fully_elapsed(now);
                let remaining = series.len().saturating_sub(elapsed);
                if remaining < self.config.min_lookahead_buckets {
                    inner.stats.full_rebuilds += 1;
                    HealPlan::FullRebuild
                } else {
                    let mut levels = series.started_levels(now);
                    // Newly unlocked items are not in any bucket yet; the
                    // current level is always refreshed
                    levels.insert(ctx.current_level);
                    inner.relocation_token += 1;
                    inner.stats.relocations += 1;
                    HealPlan::Relocate {
                        levels,
                        token: inner.relocation_token,
                    }
                }
            }
        };

        match plan {
            HealPlan::None => {}
            HealPlan::FullRebuild => {
                tracing::debug!("Remaining horizon too short, rebuilding timeline");
                // The narrow path leaves other levels' cache entries alone;
                // this one is the full invalidation, so the refetch really
                // hits the network instead of replaying stale cache entries
                self.flush();
                self.coordinator.flush();
                self.load_data();
            }
            HealPlan::Relocate { levels, token } => {
                tracing::debug!(
                    levels = levels.len(),
                    token,
                    "Projection drift detected, relocating"
                );
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_relocation(levels, token, now).await });
            }
        }
    }

    /// Level-scoped background re-fetch; failures are swallowed and the
    /// last-known-good buckets stay up
    async fn run_relocation(self: Arc<Self>, levels: BTreeSet<Level>, token: u64, now: DateTime<Utc>) {
        let fetched = match self.fetch_levels(&levels).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(error = %e, "Relocation fetch failed, keeping stale buckets");
                self.inner.lock().stats.relocations_failed += 1;
                return;
            }
        };

        if self.commit_relocation(token, now, &levels, &fetched) {
            // Relocated levels also refresh the session cache
            self.coordinator.apply_snapshot(fetched);
        }
    }

    async fn fetch_levels(&self, levels: &BTreeSet<Level>) -> std::result::Result<FetchSnapshot, crate::error::TransportError> {
        let meter = self.meter.as_ref();
        Ok(FetchSnapshot {
            primitives: self.source.fetch_primitives(levels, meter).await?,
            compounds: self.source.fetch_compounds(levels, meter).await?,
            composites: self.source.fetch_composites(levels, meter).await?,
        })
    }

    /// Apply a finished relocation unless it has been superseded
    ///
    /// Returns whether the result was committed. Visible for tests: the
    /// staleness guard is a pure token comparison.
    fn commit_relocation(
        &self,
        token: u64,
        now: DateTime<Utc>,
        levels: &BTreeSet<Level>,
        fetched: &FetchSnapshot,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.relocation_token != token {
            inner.stats.relocations_discarded += 1;
            tracing::debug!(token, "Superseded relocation result discarded");
            return false;
        }
        let Some(committed) = inner.slot.committed_mut() else {
            return false;
        };

        let series = &mut committed.state.series;
        let slide = series.fully_elapsed(now);
        series.slide(slide);
        series.purge_levels(levels);
        series.record_library(&fetched.primitives);
        series.record_library(&fetched.compounds);
        series.record_library(&fetched.composites);

        tracing::debug!(
            slide,
            levels = levels.len(),
            "Relocation committed"
        );

        if let Some(surface) = &inner.surface {
            if let Some(committed) = inner.slot.committed() {
                surface.render(&committed.state.series);
            }
        }
        true
    }
}

impl FetchConsumer for TimelineAggregator {
    fn start_update(&self, _ctx: &UserContext, _kinds: KindSet) -> bool {
        let config = self.config.clone();
        let mut inner = self.inner.lock();
        // A fresh build supersedes any in-flight relocation
        inner.relocation_token += 1;
        inner.slot.begin_with(|| TimelineState {
            series: BucketSeries::new(Utc::now(), config.bucket_width, config.horizon_buckets),
        })
    }

    fn primitives_loaded(&self, library: &Library<PrimitiveItem>) {
        if let Some(state) = self.inner.lock().slot.supply(ItemKind::Primitive) {
            state.series.record_library(library);
        }
    }

    fn compounds_loaded(&self, library: &Library<CompoundItem>) {
        if let Some(state) = self.inner.lock().slot.supply(ItemKind::Compound) {
            state.series.record_library(library);
        }
    }

    fn composites_loaded(&self, library: &Library<CompositeItem>) {
        if let Some(state) = self.inner.lock().slot.supply(ItemKind::Composite) {
            state.series.record_library(library);
        }
    }

    fn done(&self, ok: bool) {
        let mut inner = self.inner.lock();
        match inner.slot.finish(ok) {
            Promotion::Committed => {
                if let (Some(surface), Some(committed)) = (&inner.surface, inner.slot.committed()) {
                    surface.render(&committed.state.series);
                }
            }
            Promotion::Failed => {
                if let Some(surface) = &inner.surface {
                    surface.render_error();
                }
            }
            Promotion::Pending | Promotion::Idle => {}
        }
    }
}
