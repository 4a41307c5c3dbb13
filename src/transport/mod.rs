//! Collaborator traits for the wire transport and the usage-accounting sink
//!
//! The core never speaks a wire protocol itself. Everything it needs from the
//! remote service comes through [`ItemSource`], injected as a trait object the
//! same way storage and index engines are pluggable elsewhere in this style of
//! system. Payload parsing, session handling and retries live behind the
//! trait; the core only sees typed records or a [`TransportError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::TransportError;
use crate::types::{CompositeItem, CompoundItem, Level, PrimitiveItem};

/// Authoritative per-user context reported by the service
///
/// The three counters are the drift-check reference values: the timeline
/// aggregator compares its locally summed projections against them on every
/// refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// The user's current level; general fetches cover levels 1..=this
    pub current_level: Level,

    /// Items the service projects to become available within the next hour,
    /// including those available right now
    pub next_hour_projected: u32,

    /// Items the service projects within the next 24 hours, including those
    /// available right now
    pub next_day_projected: u32,

    /// Items available for review at the instant the context was computed
    pub available_now: u32,
}

/// Opaque usage-accounting sink
///
/// The transport layer reports byte counts per call; the core passes the
/// handle through without ever inspecting values.
pub trait UsageMeter: Send + Sync {
    /// Record bytes transferred on behalf of the owning request
    fn record_bytes(&self, bytes: u64);
}

/// Meter that discards all accounting, for callers that do not track usage
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMeter;

impl UsageMeter for NullMeter {
    fn record_bytes(&self, _bytes: u64) {}
}

/// Typed, level-scoped access to the remote item-tracking service
///
/// Every fetch is all-or-nothing per call: on any IO or parse problem the
/// call fails with a [`TransportError`] and returns no partial results.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch all primitive records for the given levels
    async fn fetch_primitives(
        &self,
        levels: &BTreeSet<Level>,
        meter: &dyn UsageMeter,
    ) -> Result<Vec<PrimitiveItem>, TransportError>;

    /// Fetch all compound records for the given levels
    async fn fetch_compounds(
        &self,
        levels: &BTreeSet<Level>,
        meter: &dyn UsageMeter,
    ) -> Result<Vec<CompoundItem>, TransportError>;

    /// Fetch all composite records for the given levels
    async fn fetch_composites(
        &self,
        levels: &BTreeSet<Level>,
        meter: &dyn UsageMeter,
    ) -> Result<Vec<CompositeItem>, TransportError>;

    /// Fetch the authoritative user context (level + projection counters)
    async fn fetch_user_context(
        &self,
        meter: &dyn UsageMeter,
    ) -> Result<UserContext, TransportError>;
}
