//! Session-scoped facade over the three per-kind level caches

use crate::types::{CompositeItem, CompoundItem, PrimitiveItem};

use super::level::{CacheStats, LevelCache};

/// Aggregate counter snapshot across all three kind caches
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItemsCacheStats {
    pub primitive: CacheStats,
    pub compound: CacheStats,
    pub composite: CacheStats,
}

impl ItemsCacheStats {
    /// Total cache hits across kinds
    pub fn total_hits(&self) -> u64 {
        self.primitive.hits + self.compound.hits + self.composite.hits
    }

    /// Total cache misses across kinds
    pub fn total_misses(&self) -> u64 {
        self.primitive.misses + self.compound.misses + self.composite.misses
    }
}

/// The unit of cache invalidation: one statically typed cache per item kind
///
/// Created at session start and grown monotonically; `flush` replaces the
/// whole object rather than clearing individual levels. Each kind keeps its
/// own [`LevelCache`] so no runtime type tags or casts are involved.
#[derive(Debug, Default)]
pub struct ItemsCache {
    /// Primitive record cache
    pub primitive: LevelCache<PrimitiveItem>,
    /// Compound record cache
    pub compound: LevelCache<CompoundItem>,
    /// Composite record cache
    pub composite: LevelCache<CompositeItem>,
}

impl ItemsCache {
    /// Create an empty session cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter snapshot across all three kind caches
    pub fn stats(&self) -> ItemsCacheStats {
        ItemsCacheStats {
            primitive: self.primitive.stats(),
            compound: self.compound.stats(),
            composite: self.composite.stats(),
        }
    }
}
