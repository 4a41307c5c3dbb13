//! Tier-totals statistic view
//!
//! Counts items per mastery tier across all three kinds. The smallest
//! complete consumer: it exercises the full boundary protocol (bind, flush,
//! idempotent load, two-phase promotion, error affordance) without any
//! time-based state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::coordinator::{FetchCoordinator, FetchRequest};
use crate::transport::{UsageMeter, UserContext};
use crate::types::{
    CompositeItem, CompoundItem, ItemKind, KindSet, Library, PrimitiveItem, ReviewItem, Tier,
};

use super::slot::{BuildSlot, Promotion};
use super::FetchConsumer;

/// Presentation surface for the tier-totals view
pub trait StatSurface: Send + Sync {
    /// Render committed totals
    fn render(&self, totals: &TierTotals);

    /// The backing fetch aborted; keep showing stale data with an error mark
    fn render_error(&self);
}

/// Per-tier item counts across all kinds
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TierTotals {
    counts: [u32; Tier::COUNT],
}

impl TierTotals {
    /// Count every item in a delivered library
    pub fn record<T: ReviewItem>(&mut self, library: &[T]) {
        for item in library {
            self.counts[item.tier().index()] += 1;
        }
    }

    /// Items currently at the given tier
    pub fn count(&self, tier: Tier) -> u32 {
        self.counts[tier.index()]
    }

    /// Items across all tiers
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

struct ViewInner {
    slot: BuildSlot<TierTotals>,
    surface: Option<Arc<dyn StatSurface>>,
}

/// Statistic view showing how many items sit at each mastery tier
pub struct TierTotalsView {
    coordinator: Arc<FetchCoordinator>,
    meter: Arc<dyn UsageMeter>,
    inner: Mutex<ViewInner>,
}

impl TierTotalsView {
    /// Create the view and register it with the coordinator
    pub fn register(
        coordinator: Arc<FetchCoordinator>,
        meter: Arc<dyn UsageMeter>,
    ) -> Arc<Self> {
        let view = Arc::new(Self {
            coordinator,
            meter,
            inner: Mutex::new(ViewInner {
                slot: BuildSlot::new(KindSet::all()),
                surface: None,
            }),
        });
        view.coordinator.add_consumer(view.clone() as Arc<dyn FetchConsumer>);
        view
    }

    /// Attach a presentation surface; does not itself trigger a fetch
    pub fn bind(&self, surface: Arc<dyn StatSurface>) {
        let mut inner = self.inner.lock();
        inner.surface = Some(surface.clone());
        if let Some(committed) = inner.slot.committed() {
            if committed.errored {
                surface.render_error();
            } else {
                surface.render(&committed.state);
            }
        }
    }

    /// Detach the presentation surface
    pub fn unbind(&self) {
        self.inner.lock().surface = None;
    }

    /// Discard committed state, forcing the next `load_data` to re-request
    pub fn flush(&self) {
        self.inner.lock().slot.flush();
    }

    /// Render from committed state if present, otherwise request data
    ///
    /// Idempotent: repeated calls while a fetch is pending enqueue requests
    /// that the coordinator coalesces away once the kinds are available.
    pub fn load_data(self: &Arc<Self>) {
        let rendered = {
            let inner = self.inner.lock();
            match (&inner.surface, inner.slot.committed()) {
                (Some(surface), Some(committed)) if !committed.errored => {
                    surface.render(&committed.state);
                    true
                }
                (_, Some(committed)) if !committed.errored => true,
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

    /// Committed totals, if promoted
    pub fn committed_totals(&self) -> Option<TierTotals> {
        let inner = self.inner.lock();
        inner
            .slot
            .committed()
            .filter(|c| !c.errored)
            .map(|c| c.state.clone())
    }
}

impl FetchConsumer for TierTotalsView {
    fn start_update(&self, _ctx: &UserContext, _kinds: KindSet) -> bool {
        self.inner.lock().slot.begin_with(TierTotals::default)
    }

    fn primitives_loaded(&self, library: &Library<PrimitiveItem>) {
        if let Some(state) = self.inner.lock().slot.supply(ItemKind::Primitive) {
            state.record(library);
        }
    }

    fn compounds_loaded(&self, library: &Library<CompoundItem>) {
        if let Some(state) = self.inner.lock().slot.supply(ItemKind::Compound) {
            state.record(library);
        }
    }

    fn composites_loaded(&self, library: &Library<CompositeItem>) {
        if let Some(state) = self.inner.lock().slot.supply(ItemKind::Composite) {
            state.record(library);
        }
    }

    fn done(&self, ok: bool) {
        let mut inner = self.inner.lock();
        match inner.slot.finish(ok) {
            Promotion::Committed => {
                if let (Some(surface), Some(committed)) = (&inner.surface, inner.slot.committed()) {
                    surface.render(&committed.state);
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
