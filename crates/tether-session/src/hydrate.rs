//! Attaching loaded batches to their parents.

use crate::loader::LoadedBatch;
use crate::observer::{HydrationEvent, Observers};
use tether_core::{EntityRef, Related, RelationshipDescriptor};

/// Commits a [`LoadedBatch`] onto parent relationship slots.
///
/// Hydration issues no queries. Every parent ends with its slot `Loaded`,
/// empty when the batch has nothing under its key.
pub struct Hydrator<'a> {
    observers: &'a Observers,
}

impl<'a> Hydrator<'a> {
    pub fn new(observers: &'a Observers) -> Self {
        Self { observers }
    }

    /// Attach `batch` to `parents` under `descriptor.name` and return the
    /// number of related entities attached.
    ///
    /// With an inverse configured, each child gets a back-reference to the
    /// parent instance it was attached to.
    pub fn hydrate(
        &self,
        parents: &[EntityRef],
        descriptor: &RelationshipDescriptor,
        batch: &LoadedBatch,
        path: &str,
    ) -> usize {
        let key_column = descriptor.parent_key();
        let mut related_count = 0;

        for parent in parents {
            let related = parent
                .key_of(key_column)
                .map_or(&[][..], |key| batch.get(&key));

            if let Some(inverse) = descriptor.inverse {
                for child in related {
                    child.set_back_reference(inverse, parent);
                }
            }

            let value = if descriptor.kind.is_many() {
                related_count += related.len();
                Related::Many(related.to_vec())
            } else {
                let one = related.first().cloned();
                related_count += usize::from(one.is_some());
                Related::One(one)
            };
            parent.set_relation(descriptor.name, value);
        }

        tracing::trace!(
            entity = descriptor.source,
            relationship = descriptor.name,
            path = path,
            parents = parents.len(),
            related = related_count,
            "Hydrated relationship"
        );

        self.observers.hydrated(&HydrationEvent {
            entity_type: descriptor.source,
            relationship: descriptor.name,
            path,
            parent_count: parents.len(),
            related_count,
        });

        related_count
    }
}
