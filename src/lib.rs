//! # reviewcast
//!
//! Client-side data-acquisition core for a remote item-tracking service.
//! Fetches typed, level-partitioned records (three item kinds across many
//! numbered levels), caches them for the session, and maintains a rolling,
//! time-bucketed forecast of items becoming available that self-heals against
//! the service's authoritative projections.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   request    ┌──────────────────┐   fetch    ┌────────────┐
//! │  Consumers   │─────────────▶│ FetchCoordinator │───────────▶│ ItemSource │
//! │ (stat views) │◀─────────────│  (FIFO, 1 Task)  │◀───────────│ (transport)│
//! └──────────────┘  pages+done  └────────┬─────────┘            └────────────┘
//!        ▲                               │ commits
//!        │ render                        ▼
//! ┌──────────────┐              ┌──────────────────┐
//! │   Surfaces   │              │    ItemsCache    │
//! └──────────────┘              │ (level-partition)│
//!                               └──────────────────┘
//! ```
//!
//! The [`timeline::TimelineAggregator`] is a specialized consumer: it builds
//! the 48-hour bucket horizon from delivered pages and, on every externally
//! reported refresh, cross-checks its projections against the server's and
//! relocates only the drifted levels.
//!
//! Rendering, wire transport, payload parsing and session management are
//! external collaborators consumed through the traits in [`transport`] and
//! the surface traits next to each view. Nothing here persists across process
//! restarts.

pub mod cache;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod timeline;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheEntry, CacheStats, ItemsCache, ItemsCacheStats, LevelCache, Quality};
pub use consumer::{
    BuildSlot, Committed, FetchConsumer, Promotion, StatSurface, TierTotals, TierTotalsView,
};
pub use coordinator::{CoordinatorStats, FetchCoordinator, FetchRequest};
pub use error::{Error, Result, TransportError};
pub use timeline::{
    BucketSeries, LevelSnapshot, TimelineAggregator, TimelineBucket, TimelineConfig,
    TimelineStats, TimelineSurface,
};
pub use transport::{ItemSource, NullMeter, UsageMeter, UserContext};
pub use types::{
    CompositeItem, CompoundItem, ItemKind, KindSet, Level, Library, PrimitiveItem, ReviewItem,
    Tier,
};
