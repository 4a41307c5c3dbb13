//! Fetch coordinator
//!
//! Owns the FIFO queue of pending fetch requests and guarantees at most one
//! fetch Task in flight. Overlapping requests are coalesced by subtracting
//! kinds already made available this session; arriving pages fan out to every
//! participating consumer in kind order, followed by a single `done`.
//!
//! The coordinator is also the sole writer of the [`ItemsCache`]: a Task
//! stages its fetched items and commits them only after every kind succeeded,
//! so a failed Task leaves the cache exactly as it was.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{ItemsCache, ItemsCacheStats};
use crate::consumer::FetchConsumer;
use crate::error::TransportError;
use crate::transport::{ItemSource, UsageMeter, UserContext};
use crate::types::{
    CompositeItem, CompoundItem, ItemKind, KindSet, Level, Library, PrimitiveItem,
};

// ============================================================================
// Requests
// ============================================================================

/// A queued ask for data, consumed exactly once by the coordinator
pub struct FetchRequest {
    /// Usage-accounting handle passed through to the transport
    pub meter: Arc<dyn UsageMeter>,

    /// Kinds the requesting consumer needs
    pub kinds: KindSet,
}

/// Items fetched by one Task, staged until the whole Task succeeds
#[derive(Default)]
pub struct FetchSnapshot {
    pub primitives: Vec<PrimitiveItem>,
    pub compounds: Vec<CompoundItem>,
    pub composites: Vec<CompositeItem>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected by the coordinator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Requests appended to the queue
    pub requests_enqueued: u64,

    /// Requests dropped because every kind was already available
    pub requests_coalesced: u64,

    /// Requests narrowed to a subset of their kinds before dispatch
    pub requests_narrowed: u64,

    /// Tasks dispatched to the network
    pub tasks_dispatched: u64,

    /// Tasks aborted by a transport failure
    pub tasks_failed: u64,
}

// ============================================================================
// Coordinator
// ============================================================================

/// IDLE / FETCHING state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Idle,
    Fetching,
}

struct CoordinatorInner {
    queue: VecDeque<FetchRequest>,
    state: CoordinatorState,
    /// Kinds successfully fetched at least once this session
    available: KindSet,
    consumers: Vec<Arc<dyn FetchConsumer>>,
    stats: CoordinatorStats,
}

/// Serializes background fetches and fans results out to consumers
///
/// All mutation of the session cache and of the queue happens either under
/// the coordinator's lock or inside the single in-flight Task, so writers are
/// serialized by construction and consumers only ever see read-only
/// [`Library`] views.
pub struct FetchCoordinator {
    source: Arc<dyn ItemSource>,
    cache: Mutex<ItemsCache>,
    inner: Mutex<CoordinatorInner>,
}

impl FetchCoordinator {
    /// Create a coordinator over the given transport collaborator
    pub fn new(source: Arc<dyn ItemSource>) -> Arc<Self> {
        Arc::new(Self {
            source,
            cache: Mutex::new(ItemsCache::new()),
            inner: Mutex::new(CoordinatorInner {
                queue: VecDeque::new(),
                state: CoordinatorState::Idle,
                available: KindSet::EMPTY,
                consumers: Vec::new(),
                stats: CoordinatorStats::default(),
            }),
        })
    }

    /// Register a consumer for all future fetch cycles
    pub fn add_consumer(&self, consumer: Arc<dyn FetchConsumer>) {
        self.inner.lock().consumers.push(consumer);
    }

    /// Enqueue a request; never blocks
    ///
    /// Queue draining starts immediately when the coordinator is idle,
    /// otherwise the request waits its FIFO turn. Must be called within a
    /// Tokio runtime.
    pub fn request(self: &Arc<Self>, request: FetchRequest) {
        let mut inner = self.inner.lock();
        inner.stats.requests_enqueued += 1;
        inner.queue.push_back(request);

        if inner.state == CoordinatorState::Idle {
            inner.state = CoordinatorState::Fetching;
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drain().await });
        }
    }

    /// Discard the session cache wholesale and forget kind availability
    pub fn flush(&self) {
        *self.cache.lock() = ItemsCache::new();
        self.inner.lock().available = KindSet::EMPTY;
        tracing::debug!("Session cache flushed");
    }

    /// True when no Task is in flight and the queue is empty
    pub fn is_idle(&self) -> bool {
        self.inner.lock().state == CoordinatorState::Idle
    }

    /// Counter snapshot
    pub fn stats(&self) -> CoordinatorStats {
        self.inner.lock().stats
    }

    /// Cache counter snapshot
    pub fn cache_stats(&self) -> ItemsCacheStats {
        self.cache.lock().stats()
    }

    /// Levels currently GOOD in the cache for a kind (read-only view)
    pub fn good_levels(&self, kind: ItemKind) -> BTreeSet<Level> {
        let cache = self.cache.lock();
        match kind {
            ItemKind::Primitive => cache.primitive.good_levels(),
            ItemKind::Compound => cache.compound.good_levels(),
            ItemKind::Composite => cache.composite.good_levels(),
        }
    }

    /// Commit fetched items to the session cache
    ///
    /// The single cache-mutation entry point, shared with the timeline
    /// relocation path.
    pub(crate) fn apply_snapshot(&self, snapshot: FetchSnapshot) {
        let mut cache = self.cache.lock();
        cache.primitive.put(snapshot.primitives);
        cache.compound.put(snapshot.compounds);
        cache.composite.put(snapshot.composites);
    }

    // ------------------------------------------------------------------
    // Queue draining
    // ------------------------------------------------------------------

    /// Serve queued requests strictly FIFO until the queue is empty
    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.dequeue_narrowed();
            let Some((meter, kinds)) = next else {
                break;
            };
            self.run_task(meter, kinds).await;
        }
    }

    /// Pop the next request worth dispatching, applying the coalescing step
    ///
    /// Transitions back to IDLE under the same lock that observed the empty
    /// queue, so a concurrently enqueued request either gets popped here or
    /// sees IDLE and spawns a new drain.
    fn dequeue_narrowed(&self) -> Option<(Arc<dyn UsageMeter>, KindSet)> {
        let mut inner = self.inner.lock();
        loop {
            let Some(request) = inner.queue.pop_front() else {
                inner.state = CoordinatorState::Idle;
                return None;
            };

            let narrowed = request.kinds.difference(inner.available);
            if narrowed.is_empty() {
                inner.stats.requests_coalesced += 1;
                tracing::debug!(kinds = %request.kinds, "Request already satisfied, dropped");
                continue;
            }
            if narrowed != request.kinds {
                inner.stats.requests_narrowed += 1;
                tracing::debug!(
                    requested = %request.kinds,
                    narrowed = %narrowed,
                    "Request narrowed to unmet kinds"
                );
            }
            inner.stats.tasks_dispatched += 1;
            return Some((request.meter, narrowed));
        }
    }

    // ------------------------------------------------------------------
    // Task execution
    // ------------------------------------------------------------------

    /// Run one background fetch Task for the narrowed kind set
    async fn run_task(&self, meter: Arc<dyn UsageMeter>, kinds: KindSet) {
        let ctx = match self.source.fetch_user_context(meter.as_ref()).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(error = %e, "User context fetch failed, Task aborted");
                self.inner.lock().stats.tasks_failed += 1;
                for consumer in self.registered_consumers() {
                    consumer.done(false);
                }
                return;
            }
        };

        // start_update is delivered outside the coordinator lock so consumers
        // are free to take their own locks
        let participants: Vec<Arc<dyn FetchConsumer>> = self
            .registered_consumers()
            .into_iter()
            .filter(|c| c.start_update(&ctx, kinds))
            .collect();

        match self.fetch_and_deliver(&ctx, kinds, meter.as_ref(), &participants).await {
            Ok(staged) => {
                self.apply_snapshot(staged);
                {
                    let mut inner = self.inner.lock();
                    inner.available = inner.available.union(kinds);
                }
                tracing::debug!(kinds = %kinds, level = ctx.current_level, "Fetch task completed");
                for consumer in &participants {
                    consumer.done(true);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, kinds = %kinds, "Fetch task aborted");
                self.inner.lock().stats.tasks_failed += 1;
                for consumer in &participants {
                    consumer.done(false);
                }
            }
        }
    }

    /// Fetch each requested kind, pushing pages to participants as they
    /// arrive; fetched items are staged and only committed by the caller on
    /// full success
    async fn fetch_and_deliver(
        &self,
        ctx: &UserContext,
        kinds: KindSet,
        meter: &dyn UsageMeter,
        participants: &[Arc<dyn FetchConsumer>],
    ) -> Result<FetchSnapshot, TransportError> {
        let levels: BTreeSet<Level> = (1..=ctx.current_level).collect();
        let mut staged = FetchSnapshot::default();

        if kinds.contains(ItemKind::Primitive) {
            let (mut page, missing) = { self.cache.lock().primitive.get_missing(&levels) };
            let fetched = if missing.is_empty() {
                Vec::new()
            } else {
                self.source.fetch_primitives(&missing, meter).await?
            };
            page.extend(fetched.iter().cloned());
            let library: Library<PrimitiveItem> = Arc::new(page);
            for consumer in participants {
                consumer.primitives_loaded(&library);
            }
            staged.primitives = fetched;
        }

        if kinds.contains(ItemKind::Compound) {
            let (mut page, missing) = { self.cache.lock().compound.get_missing(&levels) };
            let fetched = if missing.is_empty() {
                Vec::new()
            } else {
                self.source.fetch_compounds(&missing, meter).await?
            };
            page.extend(fetched.iter().cloned());
            let library: Library<CompoundItem> = Arc::new(page);
            for consumer in participants {
                consumer.compounds_loaded(&library);
            }
            staged.compounds = fetched;
        }

        if kinds.contains(ItemKind::Composite) {
            let (mut page, missing) = { self.cache.lock().composite.get_missing(&levels) };
            let fetched = if missing.is_empty() {
                Vec::new()
            } else {
                self.source.fetch_composites(&missing, meter).await?
            };
            page.extend(fetched.iter().cloned());
            let library: Library<CompositeItem> = Arc::new(page);
            for consumer in participants {
                consumer.composites_loaded(&library);
            }
            staged.composites = fetched;
        }

        Ok(staged)
    }

    fn registered_consumers(&self) -> Vec<Arc<dyn FetchConsumer>> {
        self.inner.lock().consumers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{compound, context, primitive, CountingMeter, ScriptedSource};
    use crate::types::Tier;
    use std::time::Duration;

    /// Consumer that records the exact callback sequence
    struct RecordingConsumer {
        events: Mutex<Vec<String>>,
    }

    impl RecordingConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl FetchConsumer for RecordingConsumer {
        fn start_update(&self, _ctx: &UserContext, kinds: KindSet) -> bool {
            self.events.lock().push(format!("start:{kinds}"));
            true
        }

        fn primitives_loaded(&self, library: &Library<PrimitiveItem>) {
            self.events.lock().push(format!("prim:{}", library.len()));
        }

        fn compounds_loaded(&self, library: &Library<CompoundItem>) {
            self.events.lock().push(format!("comp:{}", library.len()));
        }

        fn composites_loaded(&self, library: &Library<CompositeItem>) {
            self.events.lock().push(format!("compo:{}", library.len()));
        }

        fn done(&self, ok: bool) {
            self.events.lock().push(format!("done:{ok}"));
        }
    }

    async fn settle(coordinator: &Arc<FetchCoordinator>) {
        for _ in 0..200 {
            if coordinator.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("coordinator did not go idle");
    }

    fn meter() -> Arc<CountingMeter> {
        Arc::new(CountingMeter::default())
    }

    fn request(kinds: KindSet) -> FetchRequest {
        FetchRequest {
            meter: meter(),
            kinds,
        }
    }

    #[tokio::test]
    async fn test_cold_cache_fetches_full_level_range() {
        // Scenario A: empty cache, three levels, one kind
        let source = Arc::new(ScriptedSource::new(context(3)));
        source.add_primitives(vec![
            primitive(1, 1, Tier::Apprentice, None),
            primitive(2, 2, Tier::Apprentice, None),
            primitive(3, 3, Tier::Apprentice, None),
        ]);
        let coordinator = FetchCoordinator::new(source.clone());

        coordinator.request(request(KindSet::only(ItemKind::Primitive)));
        settle(&coordinator).await;

        let calls = source.calls_for(ItemKind::Primitive);
        assert_eq!(calls, vec![[1, 2, 3].into_iter().collect::<BTreeSet<_>>()]);
        assert_eq!(
            coordinator.good_levels(ItemKind::Primitive),
            [1, 2, 3].into_iter().collect()
        );

        // A repeat request for the same kind issues no Task at all
        coordinator.request(request(KindSet::only(ItemKind::Primitive)));
        settle(&coordinator).await;

        assert_eq!(source.calls_for(ItemKind::Primitive).len(), 1);
        assert_eq!(coordinator.stats().requests_coalesced, 1);
        assert_eq!(coordinator.stats().tasks_dispatched, 1);
    }

    #[tokio::test]
    async fn test_back_to_back_requests_coalesce_overlap() {
        // {A,B} then {B,C}: the second Task must touch only C
        let source = Arc::new(ScriptedSource::new(context(1)));
        let coordinator = FetchCoordinator::new(source.clone());

        let ab = KindSet::from_kinds(&[ItemKind::Primitive, ItemKind::Compound]);
        let bc = KindSet::from_kinds(&[ItemKind::Compound, ItemKind::Composite]);
        coordinator.request(request(ab));
        coordinator.request(request(bc));
        settle(&coordinator).await;

        assert_eq!(source.calls_for(ItemKind::Primitive).len(), 1);
        assert_eq!(source.calls_for(ItemKind::Compound).len(), 1);
        assert_eq!(source.calls_for(ItemKind::Composite).len(), 1);
        assert_eq!(coordinator.stats().tasks_dispatched, 2);
        assert_eq!(coordinator.stats().requests_narrowed, 1);
    }

    #[tokio::test]
    async fn test_pages_arrive_in_kind_order_then_done() {
        let source = Arc::new(ScriptedSource::new(context(1)));
        source.add_primitives(vec![primitive(1, 1, Tier::Apprentice, None)]);
        source.add_compounds(vec![compound(2, 1, Tier::Guru, None)]);
        let coordinator = FetchCoordinator::new(source);
        let consumer = RecordingConsumer::new();
        coordinator.add_consumer(consumer.clone());

        coordinator.request(request(KindSet::all()));
        settle(&coordinator).await;

        assert_eq!(
            consumer.events(),
            vec![
                "start:{primitive,compound,composite}".to_string(),
                "prim:1".to_string(),
                "comp:1".to_string(),
                "compo:0".to_string(),
                "done:true".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_task_leaves_cache_untouched_and_retries() {
        // Scenario D: failure after the primitive page, before compounds
        let source = Arc::new(ScriptedSource::new(context(2)));
        source.add_primitives(vec![primitive(1, 1, Tier::Apprentice, None)]);
        source.fail_kind(ItemKind::Compound, true);
        let coordinator = FetchCoordinator::new(source.clone());
        let consumer = RecordingConsumer::new();
        coordinator.add_consumer(consumer.clone());

        let ab = KindSet::from_kinds(&[ItemKind::Primitive, ItemKind::Compound]);
        coordinator.request(request(ab));
        settle(&coordinator).await;

        // The primitive page was delivered, then the Task aborted
        assert!(consumer.events().contains(&"prim:1".to_string()));
        assert!(consumer.events().contains(&"done:false".to_string()));
        // No partial cache writes
        assert!(coordinator.good_levels(ItemKind::Primitive).is_empty());
        assert_eq!(coordinator.stats().tasks_failed, 1);

        // Neither kind was marked available, so an identical request re-issues
        // the full fetch for both
        source.fail_kind(ItemKind::Compound, false);
        coordinator.request(request(ab));
        settle(&coordinator).await;

        assert_eq!(source.calls_for(ItemKind::Primitive).len(), 2);
        assert_eq!(source.calls_for(ItemKind::Compound).len(), 2);
        assert_eq!(
            coordinator.good_levels(ItemKind::Primitive),
            [1].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn test_partial_hit_fetches_only_missing_levels() {
        let source = Arc::new(ScriptedSource::new(context(3)));
        source.add_primitives(vec![
            primitive(1, 1, Tier::Apprentice, None),
            primitive(2, 2, Tier::Apprentice, None),
            primitive(3, 3, Tier::Apprentice, None),
        ]);
        let coordinator = FetchCoordinator::new(source.clone());
        let consumer = RecordingConsumer::new();
        coordinator.add_consumer(consumer.clone());

        // Levels 1 and 2 are already warm (a relocation commits through the
        // same entry point); the Task covers 1..=3 but only level 3 is cold
        coordinator.apply_snapshot(FetchSnapshot {
            primitives: vec![
                primitive(1, 1, Tier::Apprentice, None),
                primitive(2, 2, Tier::Apprentice, None),
            ],
            ..Default::default()
        });

        coordinator.request(request(KindSet::only(ItemKind::Primitive)));
        settle(&coordinator).await;

        let calls = source.calls_for(ItemKind::Primitive);
        assert_eq!(calls, vec![[3].into_iter().collect::<BTreeSet<_>>()]);
        // The delivered library still carries all three levels
        assert!(consumer.events().contains(&"prim:3".to_string()));
        assert!(coordinator.cache_stats().primitive.hits >= 2);
    }

    #[tokio::test]
    async fn test_context_failure_aborts_task() {
        let source = Arc::new(ScriptedSource::new(context(1)));
        source.fail_context(true);
        let coordinator = FetchCoordinator::new(source.clone());
        let consumer = RecordingConsumer::new();
        coordinator.add_consumer(consumer.clone());

        coordinator.request(request(KindSet::all()));
        settle(&coordinator).await;

        assert_eq!(consumer.events(), vec!["done:false".to_string()]);
        assert_eq!(coordinator.stats().tasks_failed, 1);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flush_discards_cache_and_availability() {
        let source = Arc::new(ScriptedSource::new(context(1)));
        source.add_primitives(vec![primitive(1, 1, Tier::Apprentice, None)]);
        let coordinator = FetchCoordinator::new(source.clone());

        coordinator.request(request(KindSet::only(ItemKind::Primitive)));
        settle(&coordinator).await;
        assert!(!coordinator.good_levels(ItemKind::Primitive).is_empty());

        coordinator.flush();
        assert!(coordinator.good_levels(ItemKind::Primitive).is_empty());

        // The same request is no longer coalesced away
        coordinator.request(request(KindSet::only(ItemKind::Primitive)));
        settle(&coordinator).await;
        assert_eq!(source.calls_for(ItemKind::Primitive).len(), 2);
    }
}
