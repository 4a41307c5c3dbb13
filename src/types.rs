//! Core data types used throughout the acquisition layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Level number under which items are partitioned, cached and fetched
pub type Level = u32;

/// A read-only page of items delivered to consumers during a fetch cycle
///
/// Libraries are shared by reference between the coordinator and every
/// registered consumer; consumers must not mutate them.
pub type Library<T> = Arc<Vec<T>>;

/// The three record kinds served by the remote item-tracking service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// Single-component items
    Primitive,
    /// Items built from primitives
    Compound,
    /// Items built from compounds
    Composite,
}

impl ItemKind {
    /// All kinds in fetch order (primitive pages are always delivered first)
    pub const ALL: [ItemKind; 3] = [ItemKind::Primitive, ItemKind::Compound, ItemKind::Composite];

    /// Stable index used for per-kind counter arrays
    pub fn index(self) -> usize {
        match self {
            ItemKind::Primitive => 0,
            ItemKind::Compound => 1,
            ItemKind::Composite => 2,
        }
    }

    fn bit(self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Primitive => write!(f, "primitive"),
            ItemKind::Compound => write!(f, "compound"),
            ItemKind::Composite => write!(f, "composite"),
        }
    }
}

/// Compact set of [`ItemKind`] values
///
/// Carried wherever "which kinds are needed" matters: fetch requests,
/// coalescing, consumer promotion tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KindSet(u8);

impl KindSet {
    /// The empty set
    pub const EMPTY: KindSet = KindSet(0);

    /// All three kinds
    pub fn all() -> Self {
        KindSet(0b111)
    }

    /// Set containing a single kind
    pub fn only(kind: ItemKind) -> Self {
        KindSet(kind.bit())
    }

    /// Build from a slice of kinds
    pub fn from_kinds(kinds: &[ItemKind]) -> Self {
        kinds.iter().fold(KindSet::EMPTY, |s, &k| s.with(k))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, kind: ItemKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Returns true if every kind in `other` is also in `self`
    pub fn contains_all(self, other: KindSet) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn with(self, kind: ItemKind) -> Self {
        KindSet(self.0 | kind.bit())
    }

    #[must_use]
    pub fn union(self, other: KindSet) -> Self {
        KindSet(self.0 | other.0)
    }

    /// Kinds in `self` that are not in `other` (the coalescing step)
    #[must_use]
    pub fn difference(self, other: KindSet) -> Self {
        KindSet(self.0 & !other.0)
    }

    pub fn insert(&mut self, kind: ItemKind) {
        self.0 |= kind.bit();
    }

    /// Iterate kinds in fetch order
    pub fn iter(self) -> impl Iterator<Item = ItemKind> {
        ItemKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "{{")?;
        for kind in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{kind}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

/// Ordered mastery stages
///
/// `Burned` is terminal: burned items never become available again and are
/// excluded from availability bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Apprentice,
    Guru,
    Master,
    Enlightened,
    Burned,
}

impl Tier {
    /// Number of tiers (size of per-tier counter arrays)
    pub const COUNT: usize = 5;

    /// All tiers in mastery order
    pub const ALL: [Tier; Tier::COUNT] = [
        Tier::Apprentice,
        Tier::Guru,
        Tier::Master,
        Tier::Enlightened,
        Tier::Burned,
    ];

    /// Stable index used for per-tier counter arrays
    pub fn index(self) -> usize {
        match self {
            Tier::Apprentice => 0,
            Tier::Guru => 1,
            Tier::Master => 2,
            Tier::Enlightened => 3,
            Tier::Burned => 4,
        }
    }

    /// Terminal tier: excluded from future availability
    pub fn is_terminal(self) -> bool {
        matches!(self, Tier::Burned)
    }

    /// Human-readable stage name for presentation surfaces
    pub fn label(self) -> &'static str {
        match self {
            Tier::Apprentice => "Apprentice",
            Tier::Guru => "Guru",
            Tier::Master => "Master",
            Tier::Enlightened => "Enlightened",
            Tier::Burned => "Burned",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Common access surface shared by the three item record kinds
///
/// Keeps the level cache and the timeline bucketing generic over the concrete
/// record type without any runtime type tags.
pub trait ReviewItem: Clone + Send + Sync + 'static {
    /// The record kind this item belongs to
    fn kind(&self) -> ItemKind;

    /// Level partition this item lives under
    fn level(&self) -> Level;

    /// Current mastery tier
    fn tier(&self) -> Tier;

    /// When the item next becomes reviewable; `None` for locked items
    fn available_at(&self) -> Option<DateTime<Utc>>;
}

macro_rules! item_record {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            /// Service-assigned record id
            pub id: u64,
            /// Level partition
            pub level: Level,
            /// Current mastery tier
            pub tier: Tier,
            /// Next availability; `None` while locked
            pub available_at: Option<DateTime<Utc>>,
            /// Display slug
            pub slug: String,
        }

        impl ReviewItem for $name {
            fn kind(&self) -> ItemKind {
                $kind
            }

            fn level(&self) -> Level {
                self.level
            }

            fn tier(&self) -> Tier {
                self.tier
            }

            fn available_at(&self) -> Option<DateTime<Utc>> {
                self.available_at
            }
        }
    };
}

item_record!(
    /// A primitive item record
    PrimitiveItem,
    ItemKind::Primitive
);
item_record!(
    /// A compound item record
    CompoundItem,
    ItemKind::Compound
);
item_record!(
    /// A composite item record
    CompositeItem,
    ItemKind::Composite
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_set_algebra() {
        let ab = KindSet::from_kinds(&[ItemKind::Primitive, ItemKind::Compound]);
        let bc = KindSet::from_kinds(&[ItemKind::Compound, ItemKind::Composite]);

        assert_eq!(ab.union(bc), KindSet::all());
        assert_eq!(bc.difference(ab), KindSet::only(ItemKind::Composite));
        assert!(ab.contains(ItemKind::Compound));
        assert!(!ab.contains(ItemKind::Composite));
        assert!(KindSet::all().contains_all(ab));
        assert!(!ab.contains_all(bc));
        assert!(KindSet::EMPTY.is_empty());
    }

    #[test]
    fn test_kind_set_iterates_in_fetch_order() {
        let kinds: Vec<ItemKind> = KindSet::all().iter().collect();
        assert_eq!(kinds, ItemKind::ALL.to_vec());
    }

    #[test]
    fn test_tier_ordering_and_terminal() {
        assert!(Tier::Apprentice < Tier::Burned);
        assert!(Tier::Burned.is_terminal());
        assert!(!Tier::Enlightened.is_terminal());
        assert_eq!(Tier::Guru.label(), "Guru");
    }
}
