//! Two-phase building/committed state holder
//!
//! The slot keeps the happens-before relationship between a consumer's
//! in-progress and rendered state auditable: two named fields and one
//! explicit promotion transition, never in-place mutation of a shared object.

use crate::types::{ItemKind, KindSet};

/// A promoted, renderable state
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<S> {
    /// The state itself
    pub state: S,

    /// Set when the promoting Task aborted; presentation surfaces show an
    /// error affordance instead of the data
    pub errored: bool,
}

#[derive(Debug)]
struct Building<S> {
    state: S,
    /// Kinds supplied across this and all previous Tasks feeding this build
    supplied: KindSet,
}

/// Outcome of a `done` signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// All required kinds supplied; building state promoted
    Committed,
    /// Task succeeded but some required kinds are still missing; the build
    /// stays pending for a later Task
    Pending,
    /// Task aborted; partial state promoted with the error flag set
    Failed,
    /// No build was in progress; nothing changed
    Idle,
}

/// Per-consumer two-phase state slot
///
/// At most one building state exists at a time; it is promoted atomically on
/// fetch completion, and only once every kind in `required` has been supplied
/// across however many Tasks that takes.
#[derive(Debug)]
pub struct BuildSlot<S> {
    required: KindSet,
    building: Option<Building<S>>,
    committed: Option<Committed<S>>,
}

impl<S> BuildSlot<S> {
    /// Create a slot for a consumer requiring the given kinds
    pub fn new(required: KindSet) -> Self {
        Self {
            required,
            building: None,
            committed: None,
        }
    }

    /// The kinds this consumer needs before a successful promotion
    pub fn required(&self) -> KindSet {
        self.required
    }

    /// Join a Task, creating the building state via `make` if none is pending
    ///
    /// Returns `false` when a healthy committed state is already current and
    /// no build is pending; a bind that happens mid-flight must not force a
    /// redundant rebuild. An errored committed state does not decline: the
    /// next Task is its retry.
    pub fn begin_with(&mut self, make: impl FnOnce() -> S) -> bool {
        if self.building.is_none() {
            if let Some(committed) = &self.committed {
                if !committed.errored {
                    return false;
                }
            }
        }
        if self.building.is_none() {
            self.building = Some(Building {
                state: make(),
                supplied: KindSet::EMPTY,
            });
        }
        true
    }

    /// Record a delivered kind and expose the building state for population
    ///
    /// Returns `None` when no build is pending or the kind was already
    /// supplied; a kind must never be processed twice into the same build.
    pub fn supply(&mut self, kind: ItemKind) -> Option<&mut S> {
        let building = self.building.as_mut()?;
        if building.supplied.contains(kind) {
            return None;
        }
        building.supplied.insert(kind);
        Some(&mut building.state)
    }

    /// Handle the Task's `done` signal
    pub fn finish(&mut self, ok: bool) -> Promotion {
        let Some(building) = self.building.take() else {
            return Promotion::Idle;
        };

        if !ok {
            self.committed = Some(Committed {
                state: building.state,
                errored: true,
            });
            return Promotion::Failed;
        }

        if building.supplied.contains_all(self.required) {
            self.committed = Some(Committed {
                state: building.state,
                errored: false,
            });
            Promotion::Committed
        } else {
            // Incomplete: keep the build pending for a later Task
            self.building = Some(building);
            Promotion::Pending
        }
    }

    /// The committed state, if any
    pub fn committed(&self) -> Option<&Committed<S>> {
        self.committed.as_ref()
    }

    /// Mutable access to the committed state (relocation path)
    pub fn committed_mut(&mut self) -> Option<&mut Committed<S>> {
        self.committed.as_mut()
    }

    /// Discard all state, forcing the next `load_data` to re-request
    pub fn flush(&mut self) {
        self.building = None;
        self.committed = None;
    }
}
