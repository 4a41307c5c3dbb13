//! Level-partitioned item caches
//!
//! This module holds the session-scoped cache layer:
//!
//! - **Level cache**: per-kind store keyed by level number with partial-hit
//!   lookups (`level.rs`)
//! - **Items cache**: facade composing the three kind caches; the unit of
//!   cache invalidation (`items.rs`)
//!
//! All state is in-memory only and deliberately discarded on session end.
//! Mutation is confined to the fetch coordinator; everything else sees
//! read-only views.

mod level;
pub use level::{CacheEntry, CacheStats, LevelCache, Quality};

mod items;
pub use items::{ItemsCache, ItemsCacheStats};
