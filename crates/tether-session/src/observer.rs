//! Ordered observer callbacks.
//!
//! Observers are informational: they run synchronously in registration
//! order and cannot fail or alter a load.

use tether_core::EntityRef;

/// Summary passed to `on_hydrated` observers after a relationship is
/// committed for one batch of parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrationEvent<'a> {
    /// Entity type of the parents.
    pub entity_type: &'static str,
    pub relationship: &'static str,
    /// Full include path ending at this relationship (`"employees.sales"`).
    pub path: &'a str,
    pub parent_count: usize,
    /// Number of related entities attached across all parents.
    pub related_count: usize,
}

type RetrievedFn = Box<dyn Fn(&EntityRef) + Send + Sync>;
type HydratedFn = Box<dyn Fn(&HydrationEvent<'_>) + Send + Sync>;

/// Registered observer callbacks.
#[derive(Default)]
pub struct Observers {
    retrieved: Vec<RetrievedFn>,
    hydrated: Vec<HydratedFn>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("retrieved", &self.retrieved.len())
            .field("hydrated", &self.hydrated.len())
            .finish()
    }
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once for every entity built from a row.
    pub fn on_retrieved(&mut self, f: impl Fn(&EntityRef) + Send + Sync + 'static) {
        self.retrieved.push(Box::new(f));
    }

    /// Called after a relationship has been committed for a batch.
    pub fn on_hydrated(&mut self, f: impl Fn(&HydrationEvent<'_>) + Send + Sync + 'static) {
        self.hydrated.push(Box::new(f));
    }

    pub(crate) fn retrieved(&self, entity: &EntityRef) {
        for cb in &self.retrieved {
            cb(entity);
        }
    }

    pub(crate) fn hydrated(&self, event: &HydrationEvent<'_>) {
        for cb in &self.hydrated {
            cb(event);
        }
    }
}
