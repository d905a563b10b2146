//! Tether - batched relationship loading for mapped entities.
//!
//! Tether resolves relationships between entities without issuing one query
//! per parent:
//!
//! - Declarative relationship descriptors (has-many, has-one, belongs-to,
//!   one-of-many, and their `through` variants)
//! - Batch loading: one relationship for N parents in a fixed number of queries
//! - Dotted include paths (`"posts.comments.author"`) loaded breadth-first
//! - Strict mode that turns accidental lazy loads into errors
//! - N+1 detection for the lazy loads that remain
//!
//! # Quick Start
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry.register_entity(EntitySchema::new("customer", "customers").columns(&["name"]))?;
//! registry.register_entity(
//!     EntitySchema::new("order", "orders").columns(&["customer_id", "created_at"]),
//! )?;
//! registry.register_relationship(
//!     RelationshipDescriptor::has_one_of_many(
//!         "latest_order",
//!         "customer",
//!         "order",
//!         "customer_id",
//!         SelectionRule::max_by("created_at"),
//!     )
//!     .inverse("customer"),
//! )?;
//!
//! let session = Session::with_config(
//!     registry,
//!     executor,
//!     SessionConfig::default().strictness(Strictness::strict()),
//! );
//!
//! // 2 queries regardless of how many customers match.
//! let customers = session
//!     .fetch(&cx, Query::new("customer").with("latest_order"))
//!     .await;
//! ```
//!
//! Queries go through a [`QueryExecutor`]. [`MemoryExecutor`] evaluates
//! them against in-memory tables.

pub mod memory;

pub use memory::{MemoryExecutor, row};

// Re-export all public types from sub-crates
pub use tether_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Values and rows
    Key,
    Row,
    Value,
    // Entities
    Entity,
    EntityRef,
    EntitySchema,
    Registry,
    Related,
    RelationSlot,
    SlotState,
    // Mapping
    ColumnMapper,
    INTERNAL_COLUMN_PREFIX,
    RowMapper,
    // Relationships
    Aggregate,
    Direction,
    OrderBy,
    RelationshipDescriptor,
    RelationshipKind,
    SelectionRule,
    ThroughStrategy,
    // Selects and execution
    Condition,
    Dialect,
    GroupSelection,
    QueryExecutor,
    Select,
    THROUGH_KEY_ALIAS,
    ThroughJoin,
    // Configuration
    LazyLoading,
    Strictness,
    // Errors
    ConfigError,
    ConnectionError,
    ConnectionErrorKind,
    Error,
    LazyAccessViolation,
    MappingError,
    MissingAttributeError,
    QueryError,
    QueryErrorKind,
    Result,
};

pub use tether_session::{
    BatchLoader, CallSite, EagerPlanner, HydrationEvent, Hydrator, IncludePath, LazyGuard,
    LoadReport, LoadedBatch, N1QueryTracker, N1Stats, Observers, Plan, Query, Session,
    SessionConfig,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tether::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Condition, Cx, Direction, EntityRef, EntitySchema, Error, LazyLoading, MemoryExecutor,
        Outcome, QueryExecutor, Query, Registry, Related, RelationshipDescriptor, Result, Row,
        SelectionRule, Session, SessionConfig, SlotState, Strictness, ThroughStrategy, Value,
    };
}
