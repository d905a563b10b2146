//! Entity schemas: columns, primary key, default attributes, row mapping.

use crate::config::Strictness;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Prefix of bookkeeping columns the loader adds to result sets.
///
/// Mapping skips these silently even under strict attribute handling.
pub const INTERNAL_COLUMN_PREFIX: &str = "__tether_";

/// Converts a raw row into an entity instance.
///
/// The default conversion copies declared columns. Install a custom mapper
/// on an [`EntitySchema`] to compute attributes, rename columns, or reject
/// rows; failures should be reported as [`Error::Mapping`].
pub trait RowMapper: Send + Sync {
    fn map_row(&self, schema: &EntitySchema, row: &Row, strictness: &Strictness)
    -> Result<Entity>;
}

/// Declared shape of one entity type.
#[derive(Clone)]
pub struct EntitySchema {
    /// Entity type name, used in relationship declarations.
    pub name: &'static str,
    /// Backing table.
    pub table: &'static str,
    /// Primary-key column.
    pub primary_key: &'static str,
    /// Declared columns (always includes the primary key).
    pub columns: Vec<&'static str>,
    /// Default attribute values applied when instantiating a new entity.
    pub defaults: BTreeMap<String, Value>,
    mapper: Option<Arc<dyn RowMapper>>,
}

impl EntitySchema {
    /// Create a schema with primary key `"id"` and no other columns.
    #[must_use]
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            primary_key: "id",
            columns: vec!["id"],
            defaults: BTreeMap::new(),
            mapper: None,
        }
    }

    /// Set the primary-key column.
    #[must_use]
    pub fn primary_key(mut self, column: &'static str) -> Self {
        self.columns.retain(|c| *c != self.primary_key);
        self.primary_key = column;
        if !self.columns.contains(&column) {
            self.columns.insert(0, column);
        }
        self
    }

    /// Declare additional columns.
    #[must_use]
    pub fn columns(mut self, columns: &[&'static str]) -> Self {
        for col in columns {
            if !self.columns.contains(col) {
                self.columns.push(*col);
            }
        }
        self
    }

    /// Declare a default attribute value.
    #[must_use]
    pub fn default_value(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.defaults.insert(column.to_string(), value.into());
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
        self
    }

    /// Install a custom row mapper.
    #[must_use]
    pub fn mapper(mut self, mapper: impl RowMapper + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Whether `column` is declared.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| *c == column)
    }

    /// Build a new entity, filling unspecified attributes from the defaults.
    pub fn instantiate(&self, attributes: BTreeMap<String, Value>) -> Entity {
        let mut merged = self.defaults.clone();
        merged.extend(attributes);
        Entity::new(self.name, self.primary_key, merged)
    }

    /// Convert a row into an entity, through the custom mapper if one is set.
    pub fn map_row(&self, row: &Row, strictness: &Strictness) -> Result<Entity> {
        match &self.mapper {
            Some(mapper) => mapper.map_row(self, row, strictness),
            None => ColumnMapper.map_row(self, row, strictness),
        }
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("defaults", &self.defaults)
            .field("custom_mapper", &self.mapper.is_some())
            .finish()
    }
}

/// Default mapper: copies declared columns into attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMapper;

impl RowMapper for ColumnMapper {
    fn map_row(
        &self,
        schema: &EntitySchema,
        row: &Row,
        strictness: &Strictness,
    ) -> Result<Entity> {
        let mut attributes = BTreeMap::new();
        for (column, value) in row.iter() {
            if schema.has_column(column) {
                attributes.insert(column.to_string(), value.clone());
            } else if column.starts_with(INTERNAL_COLUMN_PREFIX) {
                continue;
            } else if strictness.prevent_discarding_attributes {
                return Err(Error::mapping(
                    schema.name,
                    Some(column),
                    "column is not declared on the entity",
                ));
            } else {
                tracing::trace!(
                    entity = schema.name,
                    column = column,
                    "Discarding undeclared column"
                );
            }
        }

        match attributes.get(schema.primary_key) {
            None => Err(Error::mapping(
                schema.name,
                Some(schema.primary_key),
                "primary key missing from row",
            )),
            Some(Value::Null) => Err(Error::mapping(
                schema.name,
                Some(schema.primary_key),
                "primary key is NULL",
            )),
            Some(_) => Ok(Entity::new(schema.name, schema.primary_key, attributes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_schema() -> EntitySchema {
        EntitySchema::new("order", "orders")
            .columns(&["customer_id", "total"])
            .default_value("status", "pending")
    }

    #[test]
    fn test_primary_key_is_declared() {
        let schema = EntitySchema::new("sku", "skus").primary_key("code");
        assert!(schema.has_column("code"));
        assert!(!schema.has_column("id"));
    }

    #[test]
    fn test_instantiate_applies_defaults() {
        let schema = order_schema();
        let mut attrs = BTreeMap::new();
        attrs.insert("id".to_string(), Value::BigInt(1));
        let order = schema.instantiate(attrs);
        assert_eq!(order.attribute("status"), Some(Value::Text("pending".into())));
    }

    #[test]
    fn test_instantiate_explicit_value_wins() {
        let schema = order_schema();
        let mut attrs = BTreeMap::new();
        attrs.insert("status".to_string(), Value::Text("shipped".into()));
        let order = schema.instantiate(attrs);
        assert_eq!(order.attribute("status"), Some(Value::Text("shipped".into())));
    }

    #[test]
    fn test_map_row_discards_unknown_columns() {
        let row = Row::new(
            vec!["id".into(), "customer_id".into(), "note".into()],
            vec![Value::BigInt(7), Value::BigInt(1), Value::Text("x".into())],
        );
        let order = order_schema().map_row(&row, &Strictness::default()).unwrap();
        assert_eq!(order.primary_key(), Value::BigInt(7));
        assert!(!order.has_attribute("note"));
        // Rows are authoritative: defaults are not applied.
        assert!(!order.has_attribute("status"));
    }

    #[test]
    fn test_map_row_strict_rejects_unknown_columns() {
        let row = Row::new(
            vec!["id".into(), "note".into()],
            vec![Value::BigInt(7), Value::Text("x".into())],
        );
        let strict = Strictness::default().prevent_discarding_attributes(true);
        let err = order_schema().map_row(&row, &strict).unwrap_err();
        assert!(matches!(err, Error::Mapping(ref m) if m.column.as_deref() == Some("note")));
    }

    #[test]
    fn test_map_row_skips_internal_columns_in_strict_mode() {
        let row = Row::new(
            vec!["id".into(), "__tether_through_key".into()],
            vec![Value::BigInt(7), Value::BigInt(3)],
        );
        let strict = Strictness::strict();
        assert!(order_schema().map_row(&row, &strict).is_ok());
    }

    #[test]
    fn test_map_row_null_primary_key() {
        let row = Row::new(vec!["id".into()], vec![Value::Null]);
        let err = order_schema()
            .map_row(&row, &Strictness::default())
            .unwrap_err();
        assert!(err.to_string().contains("primary key is NULL"));
    }

    struct Upper;

    impl RowMapper for Upper {
        fn map_row(
            &self,
            schema: &EntitySchema,
            row: &Row,
            strictness: &Strictness,
        ) -> Result<Entity> {
            let entity = ColumnMapper.map_row(schema, row, strictness)?;
            if let Some(Value::Text(name)) = entity.attribute("name") {
                entity.set("name", name.to_uppercase());
            }
            Ok(entity)
        }
    }

    #[test]
    fn test_custom_mapper() {
        let schema = EntitySchema::new("tag", "tags").columns(&["name"]).mapper(Upper);
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::BigInt(1), Value::Text("rust".into())],
        );
        let tag = schema.map_row(&row, &Strictness::default()).unwrap();
        assert_eq!(tag.attribute("name"), Some(Value::Text("RUST".into())));
    }
}
