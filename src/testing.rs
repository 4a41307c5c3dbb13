//! Shared in-memory doubles for the transport collaborators
//!
//! Test-only: a scripted [`ItemSource`] with a programmable corpus and
//! failure switches, plus a byte-counting [`UsageMeter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TransportError;
use crate::transport::{ItemSource, UsageMeter, UserContext};
use crate::types::{
    CompositeItem, CompoundItem, ItemKind, KindSet, Level, PrimitiveItem, Tier,
};

/// Meter that sums reported bytes
#[derive(Debug, Default)]
pub(crate) struct CountingMeter {
    bytes: AtomicU64,
}

impl CountingMeter {
    pub(crate) fn total(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl UsageMeter for CountingMeter {
    fn record_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

struct ScriptInner {
    context: UserContext,
    primitives: Vec<PrimitiveItem>,
    compounds: Vec<CompoundItem>,
    composites: Vec<CompositeItem>,
    fail_kinds: KindSet,
    fail_context: bool,
    calls: Vec<(ItemKind, BTreeSet<Level>)>,
    context_calls: u64,
}

/// Scripted service double; fetches filter the corpus by level
pub(crate) struct ScriptedSource {
    inner: Mutex<ScriptInner>,
}

impl ScriptedSource {
    pub(crate) fn new(context: UserContext) -> Self {
        Self {
            inner: Mutex::new(ScriptInner {
                context,
                primitives: Vec::new(),
                compounds: Vec::new(),
                composites: Vec::new(),
                fail_kinds: KindSet::EMPTY,
                fail_context: false,
                calls: Vec::new(),
                context_calls: 0,
            }),
        }
    }

    pub(crate) fn set_context(&self, context: UserContext) {
        self.inner.lock().context = context;
    }

    pub(crate) fn add_primitives(&self, items: Vec<PrimitiveItem>) {
        self.inner.lock().primitives.extend(items);
    }

    pub(crate) fn add_compounds(&self, items: Vec<CompoundItem>) {
        self.inner.lock().compounds.extend(items);
    }

    pub(crate) fn add_composites(&self, items: Vec<CompositeItem>) {
        self.inner.lock().composites.extend(items);
    }

    /// Make every fetch of `kind` fail with a network error
    pub(crate) fn fail_kind(&self, kind: ItemKind, fail: bool) {
        let mut inner = self.inner.lock();
        if fail {
            inner.fail_kinds.insert(kind);
        } else {
            inner.fail_kinds = inner.fail_kinds.difference(KindSet::only(kind));
        }
    }

    /// Make the user-context fetch fail with a network error
    pub(crate) fn fail_context(&self, fail: bool) {
        self.inner.lock().fail_context = fail;
    }

    /// Level sets fetched per kind, in call order
    pub(crate) fn calls(&self) -> Vec<(ItemKind, BTreeSet<Level>)> {
        self.inner.lock().calls.clone()
    }

    pub(crate) fn calls_for(&self, kind: ItemKind) -> Vec<BTreeSet<Level>> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub(crate) fn context_calls(&self) -> u64 {
        self.inner.lock().context_calls
    }
}

#[async_trait]
impl ItemSource for ScriptedSource {
    async fn fetch_primitives(
        &self,
        levels: &BTreeSet<Level>,
        meter: &dyn UsageMeter,
    ) -> Result<Vec<PrimitiveItem>, TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push((ItemKind::Primitive, levels.clone()));
        if inner.fail_kinds.contains(ItemKind::Primitive) {
            return Err(TransportError::Network("scripted failure".into()));
        }
        let items: Vec<PrimitiveItem> = inner
            .primitives
            .iter()
            .filter(|i| levels.contains(&i.level))
            .cloned()
            .collect();
        meter.record_bytes(items.len() as u64);
        Ok(items)
    }

    async fn fetch_compounds(
        &self,
        levels: &BTreeSet<Level>,
        meter: &dyn UsageMeter,
    ) -> Result<Vec<CompoundItem>, TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push((ItemKind::Compound, levels.clone()));
        if inner.fail_kinds.contains(ItemKind::Compound) {
            return Err(TransportError::Network("scripted failure".into()));
        }
        let items: Vec<CompoundItem> = inner
            .compounds
            .iter()
            .filter(|i| levels.contains(&i.level))
            .cloned()
            .collect();
        meter.record_bytes(items.len() as u64);
        Ok(items)
    }

    async fn fetch_composites(
        &self,
        levels: &BTreeSet<Level>,
        meter: &dyn UsageMeter,
    ) -> Result<Vec<CompositeItem>, TransportError> {
        let mut inner = self.inner.lock();
        inner.calls.push((ItemKind::Composite, levels.clone()));
        if inner.fail_kinds.contains(ItemKind::Composite) {
            return Err(TransportError::Network("scripted failure".into()));
        }
        let items: Vec<CompositeItem> = inner
            .composites
            .iter()
            .filter(|i| levels.contains(&i.level))
            .cloned()
            .collect();
        meter.record_bytes(items.len() as u64);
        Ok(items)
    }

    async fn fetch_user_context(
        &self,
        meter: &dyn UsageMeter,
    ) -> Result<UserContext, TransportError> {
        let mut inner = self.inner.lock();
        inner.context_calls += 1;
        if inner.fail_context {
            return Err(TransportError::Network("scripted failure".into()));
        }
        meter.record_bytes(1);
        Ok(inner.context.clone())
    }
}

pub(crate) fn context(current_level: Level) -> UserContext {
    UserContext {
        current_level,
        next_hour_projected: 0,
        next_day_projected: 0,
        available_now: 0,
    }
}

pub(crate) fn primitive(id: u64, level: Level, tier: Tier, at: Option<DateTime<Utc>>) -> PrimitiveItem {
    PrimitiveItem {
        id,
        level,
        tier,
        available_at: at,
        slug: format!("p{id}"),
    }
}

pub(crate) fn compound(id: u64, level: Level, tier: Tier, at: Option<DateTime<Utc>>) -> CompoundItem {
    CompoundItem {
        id,
        level,
        tier,
        available_at: at,
        slug: format!("k{id}"),
    }
}

pub(crate) fn composite(id: u64, level: Level, tier: Tier, at: Option<DateTime<Utc>>) -> CompositeItem {
    CompositeItem {
        id,
        level,
        tier,
        available_at: at,
        slug: format!("v{id}"),
    }
}
