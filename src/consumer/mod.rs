//! Consumer protocol for fetch cycles
//!
//! Statistic views participate in fetch cycles through [`FetchConsumer`]:
//! the coordinator announces a Task with `start_update`, pushes each kind's
//! page as it arrives, then signals a single `done`. Because Tasks may supply
//! only a subset of the kinds a consumer needs (coalescing), consumers hold
//! their in-progress data in a *building* state and promote it to a
//! *committed* state only once every required kind has been supplied across
//! one or more Tasks. [`BuildSlot`] implements that two-phase handoff.

mod slot;
pub use slot::{BuildSlot, Committed, Promotion};

mod tier_totals;
pub use tier_totals::{StatSurface, TierTotals, TierTotalsView};

use crate::transport::UserContext;
use crate::types::{CompositeItem, CompoundItem, KindSet, Library, PrimitiveItem};

/// Contract a statistic view implements to participate in fetch cycles
///
/// Called exactly in this order within one Task: `start_update` once, then
/// zero or more page callbacks in kind order (primitive, compound,
/// composite), then `done` once. Implementations must not block; they record
/// into their building state and return.
pub trait FetchConsumer: Send + Sync {
    /// Announce a Task that will supply `kinds`
    ///
    /// Returns `false` when the consumer already has a committed state and no
    /// pending build, in which case it receives no further callbacks for this
    /// Task.
    fn start_update(&self, ctx: &UserContext, kinds: KindSet) -> bool;

    /// A primitive page arrived
    fn primitives_loaded(&self, library: &Library<PrimitiveItem>);

    /// A compound page arrived
    fn compounds_loaded(&self, library: &Library<CompoundItem>);

    /// A composite page arrived
    fn composites_loaded(&self, library: &Library<CompositeItem>);

    /// The Task finished; `ok == false` means it aborted and the cache was
    /// left untouched
    fn done(&self, ok: bool);
}
