//! Core types for the tether eager-loading engine.
//!
//! This crate provides the leaf abstractions the loading engine builds on:
//!
//! - `Value`/`Key` for attribute values and hashable join keys
//! - `Entity` instances with relationship slots and back-references
//! - `EntitySchema` and `RelationshipDescriptor` declarations, held by a `Registry`
//! - `Select`, the structured filter handed to a `QueryExecutor`
//! - `Strictness` configuration
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

pub use asupersync::{Cx, Outcome};

pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod schema;
pub mod select;
pub mod value;

pub use config::{LazyLoading, Strictness};
pub use entity::{Entity, EntityRef, Related, RelationSlot, SlotState};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, LazyAccessViolation, MappingError,
    MissingAttributeError, QueryError, QueryErrorKind, Result,
};
pub use executor::QueryExecutor;
pub use registry::Registry;
pub use relationship::{
    Aggregate, Direction, OrderBy, RelationshipDescriptor, RelationshipKind, SelectionRule,
    ThroughStrategy,
};
pub use row::Row;
pub use schema::{ColumnMapper, EntitySchema, INTERNAL_COLUMN_PREFIX, RowMapper};
pub use select::{Condition, Dialect, GroupSelection, Select, THROUGH_KEY_ALIAS, ThroughJoin};
pub use value::{Key, Value};
