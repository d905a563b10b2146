//! Mapped entity instances and their relationship slots.
//!
//! An [`Entity`] is shared as an [`EntityRef`] (`Arc<Entity>`): hydration
//! attaches the *same* child instances to every parent that relates to
//! them, and back-references point at the very parent instance that caused
//! the hydration. Attributes and slots therefore use interior mutability.
//!
//! Each relationship slot moves through
//! `Unloaded -> Loading -> Loaded | Failed`. `Loaded` is terminal until the
//! caller resets the slot.

use crate::error::{Error, MissingAttributeError, Result};
use crate::value::{Key, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Shared handle to an entity instance.
pub type EntityRef = Arc<Entity>;

/// The loaded value of a relationship.
#[derive(Clone)]
pub enum Related {
    /// Single related entity, or none.
    One(Option<EntityRef>),
    /// Ordered collection of related entities.
    Many(Vec<EntityRef>),
}

impl Related {
    /// The single related entity (first of a collection).
    pub fn one(&self) -> Option<&EntityRef> {
        match self {
            Related::One(e) => e.as_ref(),
            Related::Many(v) => v.first(),
        }
    }

    /// The related entities as a slice.
    pub fn many(&self) -> &[EntityRef] {
        match self {
            Related::One(Some(e)) => std::slice::from_ref(e),
            Related::One(None) => &[],
            Related::Many(v) => v,
        }
    }

    /// Number of related entities.
    pub fn len(&self) -> usize {
        self.many().len()
    }

    /// True when nothing is related.
    pub fn is_empty(&self) -> bool {
        self.many().is_empty()
    }

    /// Iterate over the related entities.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRef> {
        self.many().iter()
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<Value> = self.iter().map(|e| e.primary_key()).collect();
        match self {
            Related::One(_) => f.debug_tuple("One").field(&keys.first()).finish(),
            Related::Many(_) => f.debug_tuple("Many").field(&keys).finish(),
        }
    }
}

/// State of one relationship slot on one entity.
#[derive(Debug, Clone, Default)]
pub enum SlotState {
    /// Never loaded (or reset).
    #[default]
    Unloaded,
    /// A lazy load is in flight.
    Loading,
    /// Loaded; the value may be empty.
    Loaded(Related),
    /// The last load attempt failed.
    Failed(String),
}

impl SlotState {
    /// Short name of the state, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            SlotState::Unloaded => "unloaded",
            SlotState::Loading => "loading",
            SlotState::Loaded(_) => "loaded",
            SlotState::Failed(_) => "failed",
        }
    }

    pub const fn is_loaded(&self) -> bool {
        matches!(self, SlotState::Loaded(_))
    }
}

/// A relationship slot: its state plus a gate serializing lazy loads.
///
/// The state lock is only held for reads and transitions. The gate is held
/// across a lazy load so two concurrent accessors of the same unloaded slot
/// issue one query between them.
pub struct RelationSlot {
    state: Mutex<SlotState>,
    gate: asupersync::sync::Mutex<()>,
}

impl RelationSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Unloaded),
            gate: asupersync::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SlotState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the state.
    pub fn set_state(&self, state: SlotState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Gate held for the duration of a lazy load.
    pub fn gate(&self) -> &asupersync::sync::Mutex<()> {
        &self.gate
    }
}

/// A mapped record: a typed bag of attributes with relationship slots.
pub struct Entity {
    entity_type: &'static str,
    primary_key: &'static str,
    attributes: RwLock<BTreeMap<String, Value>>,
    slots: Mutex<HashMap<&'static str, Arc<RelationSlot>>>,
    back_refs: RwLock<HashMap<&'static str, Weak<Entity>>>,
}

impl Entity {
    /// Create an entity of the given type from its attributes.
    pub fn new(
        entity_type: &'static str,
        primary_key: &'static str,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            entity_type,
            primary_key,
            attributes: RwLock::new(attributes),
            slots: Mutex::new(HashMap::new()),
            back_refs: RwLock::new(HashMap::new()),
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }

    /// The entity type name.
    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// The primary-key column name.
    pub fn primary_key_column(&self) -> &'static str {
        self.primary_key
    }

    /// The primary-key value (NULL if unset).
    pub fn primary_key(&self) -> Value {
        self.attribute(self.primary_key).unwrap_or(Value::Null)
    }

    /// The join key for an attribute; `None` when missing or NULL.
    pub fn key_of(&self, column: &str) -> Option<Key> {
        self.attribute(column).and_then(Key::new)
    }

    /// Read an attribute.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Read an attribute that must exist.
    pub fn require(&self, name: &str) -> Result<Value> {
        self.attribute(name).ok_or_else(|| {
            Error::MissingAttribute(MissingAttributeError {
                entity: self.entity_type.to_string(),
                attribute: name.to_string(),
            })
        })
    }

    /// Check whether an attribute is present (NULL counts as present).
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Set an attribute in place.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), value.into());
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> BTreeMap<String, Value> {
        self.attributes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get (creating on first use) the slot for a relationship.
    pub fn slot(&self, relationship: &'static str) -> Arc<RelationSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(relationship)
                .or_insert_with(|| Arc::new(RelationSlot::new())),
        )
    }

    /// Current state of a relationship slot.
    pub fn slot_state(&self, relationship: &str) -> SlotState {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(relationship)
            .map_or(SlotState::Unloaded, |slot| slot.state())
    }

    /// Whether a relationship has been loaded.
    pub fn is_loaded(&self, relationship: &str) -> bool {
        self.slot_state(relationship).is_loaded()
    }

    /// The loaded value of a relationship, if loaded.
    pub fn relation(&self, relationship: &str) -> Option<Related> {
        match self.slot_state(relationship) {
            SlotState::Loaded(related) => Some(related),
            _ => None,
        }
    }

    /// Names of all loaded relationships.
    pub fn loaded_relations(&self) -> Vec<&'static str> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.state().is_loaded())
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Mark a relationship as loaded with the given value.
    pub fn set_relation(&self, relationship: &'static str, related: Related) {
        self.slot(relationship).set_state(SlotState::Loaded(related));
    }

    /// Mark a relationship load as failed.
    pub fn mark_failed(&self, relationship: &'static str, reason: impl Into<String>) {
        self.slot(relationship)
            .set_state(SlotState::Failed(reason.into()));
    }

    /// Return one relationship slot to `Unloaded`.
    pub fn reset_relation(&self, relationship: &str) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(relationship) {
            slot.set_state(SlotState::Unloaded);
        }
    }

    /// Return every relationship slot to `Unloaded`.
    pub fn reset_relations(&self) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in slots.values() {
            slot.set_state(SlotState::Unloaded);
        }
    }

    /// Record a non-owning back-reference to the parent that hydrated us.
    pub fn set_back_reference(&self, name: &'static str, parent: &EntityRef) {
        self.back_refs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, Arc::downgrade(parent));
    }

    /// The back-reference recorded under `name`, if the parent is still alive.
    pub fn back_reference(&self, name: &str) -> Option<EntityRef> {
        self.back_refs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let states: BTreeMap<&str, &'static str> = slots
            .iter()
            .map(|(name, slot)| (*name, slot.state().name()))
            .collect();
        f.debug_struct("Entity")
            .field("type", &self.entity_type)
            .field("attributes", &self.attributes())
            .field("relations", &states)
            .finish()
    }
}
