//! Guarding access to relationships that were not eager-loaded.
//!
//! Slot transitions:
//!
//! ```text
//! Unloaded --(permissive access)--> Loading --> Loaded | Failed
//! Unloaded --(strict access)------> LazyAccessViolation, still Unloaded
//! Failed   --(permissive access)--> Loading (retry)
//! Loaded   --(any access)---------> Loaded, no query
//! ```
//!
//! Loads of one slot are serialized by the slot's gate: a second accessor
//! waits for the first and then observes its result.

use crate::hydrate::Hydrator;
use crate::loader::BatchLoader;
use crate::n1_detection::N1QueryTracker;
use std::panic::Location;
use std::sync::Mutex;
use tether_core::{
    Cx, EntityRef, Error, LazyAccessViolation, Outcome, QueryExecutor, Related,
    RelationshipDescriptor, SlotState, Strictness,
};

/// Decides whether an unloaded relationship may be loaded on access.
pub struct LazyGuard<'a, E> {
    loader: BatchLoader<'a, E>,
    hydrator: Hydrator<'a>,
    strictness: &'a Strictness,
    tracker: &'a Mutex<N1QueryTracker>,
}

impl<'a, E: QueryExecutor> LazyGuard<'a, E> {
    pub fn new(
        loader: BatchLoader<'a, E>,
        hydrator: Hydrator<'a>,
        strictness: &'a Strictness,
        tracker: &'a Mutex<N1QueryTracker>,
    ) -> Self {
        Self {
            loader,
            hydrator,
            strictness,
            tracker,
        }
    }

    /// Return the relationship, loading it with a single-parent query when
    /// permitted. `site` is recorded for N+1 detection.
    pub async fn access(
        &self,
        cx: &Cx,
        entity: &EntityRef,
        descriptor: &RelationshipDescriptor,
        site: &'static Location<'static>,
    ) -> Outcome<Related, Error> {
        let name = descriptor.name;
        if let Some(related) = entity.relation(name) {
            return Outcome::Ok(related);
        }

        if self.strictness.is_lazy_loading_prevented() {
            tracing::warn!(
                entity = entity.entity_type(),
                relationship = name,
                key = %entity.primary_key(),
                "Lazy access to unloaded relationship in strict mode"
            );
            return Outcome::Err(Error::LazyAccess(LazyAccessViolation {
                entity: entity.entity_type().to_string(),
                relationship: name.to_string(),
            }));
        }

        let slot = entity.slot(name);
        let Ok(_gate) = slot.gate().lock(cx).await else {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }
            return Outcome::Err(Error::Custom(format!(
                "failed to acquire relationship gate for {}.{}",
                entity.entity_type(),
                name
            )));
        };

        // Another accessor may have finished while we waited.
        if let SlotState::Loaded(related) = slot.state() {
            return Outcome::Ok(related);
        }

        slot.set_state(SlotState::Loading);
        tracing::debug!(
            entity = entity.entity_type(),
            relationship = name,
            key = %entity.primary_key(),
            "Lazy loading relationship"
        );
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_at(entity.entity_type(), name, site);

        let parents = std::slice::from_ref(entity);
        match self.loader.load(cx, parents, descriptor).await {
            Outcome::Ok(batch) => {
                self.hydrator.hydrate(parents, descriptor, &batch, name);
                match slot.state() {
                    SlotState::Loaded(related) => Outcome::Ok(related),
                    other => Outcome::Err(Error::Custom(format!(
                        "relationship {}.{} is {} after hydration",
                        entity.entity_type(),
                        name,
                        other.name()
                    ))),
                }
            }
            Outcome::Err(e) => {
                slot.set_state(SlotState::Failed(e.to_string()));
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                slot.set_state(SlotState::Failed("load cancelled".to_string()));
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                slot.set_state(SlotState::Failed("load panicked".to_string()));
                Outcome::Panicked(p)
            }
        }
    }
}
