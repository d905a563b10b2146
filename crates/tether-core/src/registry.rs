//! Registry of entity schemas and relationship descriptors.
//!
//! Relationships are resolved by `(entity, name)` lookup. Everything is
//! validated at registration so a bad declaration fails before any query
//! is issued.

use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::relationship::{RelationshipDescriptor, is_identifier};
use crate::schema::EntitySchema;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    entities: HashMap<&'static str, Arc<EntitySchema>>,
    relationships: HashMap<(&'static str, &'static str), Arc<RelationshipDescriptor>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity schema.
    pub fn register_entity(&mut self, schema: EntitySchema) -> Result<()> {
        for (what, value) in [("entity name", schema.name), ("table", schema.table)] {
            if !is_identifier(value) {
                return Err(Error::config(
                    schema.name,
                    None,
                    format!("{what} '{value}' is not a valid identifier"),
                ));
            }
        }
        if let Some(bad) = schema.columns.iter().find(|c| !is_identifier(c)) {
            return Err(Error::config(
                schema.name,
                None,
                format!("column '{bad}' is not a valid identifier"),
            ));
        }
        if self.entities.contains_key(schema.name) {
            return Err(Error::config(
                schema.name,
                None,
                "entity is already registered",
            ));
        }

        tracing::debug!(
            entity = schema.name,
            table = schema.table,
            columns = schema.columns.len(),
            "Registered entity"
        );
        self.entities.insert(schema.name, Arc::new(schema));
        Ok(())
    }

    /// Register a relationship, validating it against the registered schemas.
    pub fn register_relationship(
        &mut self,
        descriptor: RelationshipDescriptor,
    ) -> Result<Arc<RelationshipDescriptor>> {
        descriptor.validate()?;

        let key = (descriptor.source, descriptor.name);
        if self.relationships.contains_key(&key) {
            return Err(Error::config(
                descriptor.source,
                Some(descriptor.name),
                "relationship is already registered",
            ));
        }

        let source = self.schema_for(&descriptor, descriptor.source)?;
        let target = self.schema_for(&descriptor, descriptor.target)?;

        match descriptor.intermediate() {
            Some(hop) => {
                let intermediate = self.schema_for(&descriptor, hop.target)?;
                Self::require_column(&descriptor, &source, hop.local_key)?;
                Self::require_column(&descriptor, &intermediate, hop.foreign_key)?;
                Self::require_column(&descriptor, &intermediate, descriptor.local_key)?;
                Self::require_column(&descriptor, &target, descriptor.foreign_key)?;
            }
            None => {
                Self::require_column(&descriptor, &source, descriptor.local_key)?;
                Self::require_column(&descriptor, &target, descriptor.foreign_key)?;
            }
        }

        if let Some(rule) = &descriptor.selection {
            Self::require_column(&descriptor, &target, rule.column_or(target.primary_key))?;
        }
        if let Some(order) = &descriptor.order_by {
            Self::require_column(&descriptor, &target, order.column)?;
        }

        tracing::debug!(
            entity = descriptor.source,
            relationship = descriptor.name,
            kind = %descriptor.kind,
            target = descriptor.target,
            "Registered relationship"
        );

        let descriptor = Arc::new(descriptor);
        self.relationships.insert(key, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Look up an entity schema.
    pub fn entity(&self, name: &str) -> Result<Arc<EntitySchema>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(name, None, "entity is not registered"))
    }

    /// Look up a relationship by entity type and name.
    pub fn relationship(&self, entity: &str, name: &str) -> Result<Arc<RelationshipDescriptor>> {
        self.relationships
            .get(&(entity, name))
            .cloned()
            .ok_or_else(|| Error::config(entity, Some(name), "relationship is not registered"))
    }

    /// All relationships declared on an entity type, sorted by name.
    pub fn relationships_of(&self, entity: &str) -> Vec<Arc<RelationshipDescriptor>> {
        let mut rels: Vec<_> = self
            .relationships
            .values()
            .filter(|r| r.source == entity)
            .cloned()
            .collect();
        rels.sort_by_key(|r| r.name);
        rels
    }

    /// Build a new entity instance with the schema's default attributes.
    pub fn instantiate(
        &self,
        entity: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Result<EntityRef> {
        Ok(self.entity(entity)?.instantiate(attributes).into_ref())
    }

    fn schema_for(
        &self,
        descriptor: &RelationshipDescriptor,
        entity: &str,
    ) -> Result<Arc<EntitySchema>> {
        self.entities.get(entity).cloned().ok_or_else(|| {
            Error::config(
                descriptor.source,
                Some(descriptor.name),
                format!("entity '{entity}' is not registered"),
            )
        })
    }

    fn require_column(
        descriptor: &RelationshipDescriptor,
        schema: &EntitySchema,
        column: &str,
    ) -> Result<()> {
        if schema.has_column(column) {
            Ok(())
        } else {
            Err(Error::config(
                descriptor.source,
                Some(descriptor.name),
                format!("column '{}.{}' does not exist", schema.name, column),
            ))
        }
    }
}
