//! Eager loading and relationship resolution for Tether.
//!
//! A [`Session`] ties the engine together over one query executor:
//!
//! - [`BatchLoader`] fetches one relationship for many parents in a fixed
//!   number of queries
//! - [`Hydrator`] attaches the results and back-references
//! - [`EagerPlanner`] runs dotted include paths breadth-first
//! - [`LazyGuard`] governs access to relationships that were not included
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(registry, executor);
//!
//! // 1 query for customers, 1 for their latest orders.
//! let customers = session
//!     .fetch(&cx, Query::new("customer").with("latest_order"))
//!     .await;
//!
//! // Later, for entities that were not eager loaded:
//! session.load(&cx, &orders, &["customer", "lines.product"]).await;
//! ```

pub mod hydrate;
pub mod lazy;
pub mod loader;
pub mod n1_detection;
pub mod observer;
pub mod planner;

pub use hydrate::Hydrator;
pub use lazy::LazyGuard;
pub use loader::{BatchLoader, LoadedBatch};
pub use n1_detection::{CallSite, N1QueryTracker, N1Stats};
pub use observer::{HydrationEvent, Observers};
pub use planner::{EagerPlanner, IncludePath, LoadReport, Plan};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, Mutex};
use tether_core::{
    Condition, Cx, Direction, EntityRef, EntitySchema, Error, OrderBy, Outcome, QueryExecutor,
    Registry, Related, Result, Select, Strictness, Value,
};

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lazy-loading and attribute strictness.
    pub strictness: Strictness,
    /// Lazy loads of one relationship before an N+1 warning.
    pub n1_threshold: usize,
    /// Whether lazy loads are tracked for N+1 warnings.
    pub n1_detection: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            n1_threshold: 3,
            n1_detection: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    #[must_use]
    pub fn n1_threshold(mut self, threshold: usize) -> Self {
        self.n1_threshold = threshold;
        self
    }

    #[must_use]
    pub fn n1_detection(mut self, enabled: bool) -> Self {
        self.n1_detection = enabled;
        self
    }
}

// ============================================================================
// Root Query
// ============================================================================

/// Root fetch of one entity type with include paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entity: &'static str,
    condition: Condition,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    includes: Vec<&'static str>,
}

impl Query {
    /// Every entity of type `entity`.
    #[must_use]
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            condition: Condition::All,
            order_by: None,
            limit: None,
            includes: Vec::new(),
        }
    }

    /// Narrow the root set.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = self.condition.and(condition);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy { column, direction });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Eager load a dotted relationship path (`"employees.sales"`).
    #[must_use]
    pub fn with(mut self, path: &'static str) -> Self {
        self.includes.push(path);
        self
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn includes(&self) -> &[&'static str] {
        &self.includes
    }
}

// ============================================================================
// Session
// ============================================================================

/// Loads entities and their relationships through one executor.
pub struct Session<E: QueryExecutor> {
    registry: Arc<Registry>,
    executor: E,
    config: SessionConfig,
    observers: Observers,
    n1_tracker: Mutex<N1QueryTracker>,
}

impl<E: QueryExecutor> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl<E: QueryExecutor> Session<E> {
    /// Create a session with the default configuration.
    pub fn new(registry: impl Into<Arc<Registry>>, executor: E) -> Self {
        Self::with_config(registry, executor, SessionConfig::default())
    }

    /// Create a session with custom configuration.
    pub fn with_config(
        registry: impl Into<Arc<Registry>>,
        executor: E,
        config: SessionConfig,
    ) -> Self {
        let tracker = N1QueryTracker::new()
            .with_threshold(config.n1_threshold)
            .enabled(config.n1_detection);
        Self {
            registry: registry.into(),
            executor,
            config,
            observers: Observers::new(),
            n1_tracker: Mutex::new(tracker),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a callback fired for every entity built from a row.
    pub fn on_retrieved(&mut self, f: impl Fn(&EntityRef) + Send + Sync + 'static) {
        self.observers.on_retrieved(f);
    }

    /// Register a callback fired after a relationship is committed.
    pub fn on_hydrated(&mut self, f: impl Fn(&HydrationEvent<'_>) + Send + Sync + 'static) {
        self.observers.on_hydrated(f);
    }

    // ========================================================================
    // Entities and attributes
    // ========================================================================

    /// Build a new entity with the schema's default attributes.
    pub fn instantiate(
        &self,
        entity: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Result<EntityRef> {
        self.registry.instantiate(entity, attributes)
    }

    /// Read an attribute, failing on a missing one when strictness
    /// prevents missing attribute access.
    pub fn attribute(&self, entity: &EntityRef, name: &str) -> Result<Option<Value>> {
        if self.config.strictness.prevent_missing_attributes {
            entity.require(name).map(Some)
        } else {
            Ok(entity.attribute(name))
        }
    }

    // ========================================================================
    // Eager Loading
    // ========================================================================

    /// Fetch root entities and eager load the query's include paths.
    ///
    /// Include paths are resolved before the root query, so an unknown
    /// relationship fails without touching the executor.
    ///
    /// If any include path fails, the roots are dropped and only the first
    /// error is returned. Callers that need the roots together with the
    /// sibling paths that did load should `fetch` without paths and then
    /// [`Session::load`] them, which leaves the roots in hand and reports
    /// the failure separately.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(entity = query.entity))]
    pub async fn fetch(&self, cx: &Cx, query: Query) -> Outcome<Vec<EntityRef>, Error> {
        let (_, select, plan) = match self.prepare(&query) {
            Ok(prepared) => prepared,
            Err(e) => return Outcome::Err(e),
        };

        let roots = match self.loader().fetch_roots(cx, &select).await {
            Outcome::Ok(roots) => roots,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(count = roots.len(), "Fetched root entities");

        match self.planner().execute(cx, &plan, &roots).await {
            Outcome::Ok(_) => Outcome::Ok(roots),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Eager load `paths` onto already-materialized entities.
    ///
    /// Slots that are already `Loaded` are reused without a query. All
    /// entities must share one entity type.
    #[tracing::instrument(level = "debug", skip(self, cx, entities), fields(count = entities.len()))]
    pub async fn load(
        &self,
        cx: &Cx,
        entities: &[EntityRef],
        paths: &[&'static str],
    ) -> Outcome<LoadReport, Error> {
        let Some(first) = entities.first() else {
            return Outcome::Ok(LoadReport::default());
        };
        let root_type = first.entity_type();
        if let Some(other) = entities.iter().find(|e| e.entity_type() != root_type) {
            return Outcome::Err(Error::config(
                root_type,
                None,
                format!(
                    "cannot eager load a mixed set of '{root_type}' and '{}' entities",
                    other.entity_type()
                ),
            ));
        }

        let plan = match Plan::resolve(&self.registry, root_type, paths) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        self.planner().execute(cx, &plan, entities).await
    }

    // ========================================================================
    // Lazy Loading
    // ========================================================================

    /// Access a relationship, lazy loading it when it was not eager loaded
    /// and strictness allows.
    ///
    /// In strict mode an unloaded relationship fails with
    /// [`Error::LazyAccess`] and no query is issued.
    #[track_caller]
    pub fn relation<'s>(
        &'s self,
        cx: &'s Cx,
        entity: &'s EntityRef,
        name: &'s str,
    ) -> impl Future<Output = Outcome<Related, Error>> + 's {
        let site = Location::caller();
        async move {
            let descriptor = match self.registry.relationship(entity.entity_type(), name) {
                Ok(descriptor) => descriptor,
                Err(e) => return Outcome::Err(e),
            };
            self.lazy_guard()
                .access(cx, entity, &descriptor, site)
                .await
        }
    }

    // ========================================================================
    // Chunked Retrieval
    // ========================================================================

    /// Walk the query's result set in primary-key order, `size` entities at
    /// a time, eager loading the include paths for each chunk.
    ///
    /// The query's own ordering and limit are replaced by keyset
    /// pagination. `callback` returns `false` to stop early. Returns the
    /// number of chunks visited.
    #[tracing::instrument(level = "debug", skip(self, cx, query, callback), fields(entity = query.entity))]
    pub async fn chunk_by_id<F>(
        &self,
        cx: &Cx,
        query: Query,
        size: usize,
        mut callback: F,
    ) -> Outcome<usize, Error>
    where
        F: FnMut(&[EntityRef]) -> bool,
    {
        if size == 0 {
            return Outcome::Err(Error::config(
                query.entity,
                None,
                "chunk size must be at least 1",
            ));
        }
        let (schema, base, plan) = match self.prepare(&query) {
            Ok(prepared) => prepared,
            Err(e) => return Outcome::Err(e),
        };

        let mut chunks = 0;
        let mut last: Option<Value> = None;
        loop {
            let mut select = base.clone();
            if let Some(last) = &last {
                select = select.filter(Condition::after(schema.primary_key, last.clone()));
            }
            let select = select
                .order_by(schema.primary_key, Direction::Asc)
                .limit(size);

            let chunk = match self.loader().fetch_roots(cx, &select).await {
                Outcome::Ok(chunk) => chunk,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if chunk.is_empty() {
                break;
            }
            match self.planner().execute(cx, &plan, &chunk).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }

            chunks += 1;
            tracing::debug!(chunk = chunks, size = chunk.len(), "Visiting chunk");
            let full = chunk.len() == size;
            last = chunk.last().map(|e| e.primary_key());
            if !callback(&chunk) || !full {
                break;
            }
        }
        Outcome::Ok(chunks)
    }

    // ========================================================================
    // N+1 Detection
    // ========================================================================

    /// Lazy-load statistics since creation or the last reset.
    pub fn n1_stats(&self) -> N1Stats {
        self.n1_tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stats()
    }

    /// Lazy loads recorded for one relationship.
    pub fn n1_count(&self, entity: &str, relationship: &str) -> usize {
        self.n1_tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .count_for(entity, relationship)
    }

    /// Clear N+1 tracking, e.g. at the start of a request.
    pub fn reset_n1_tracking(&self) {
        self.n1_tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn prepare(&self, query: &Query) -> Result<(Arc<EntitySchema>, Select, Plan)> {
        let schema = self.registry.entity(query.entity)?;
        let plan = Plan::resolve(&self.registry, schema.name, &query.includes)?;
        let mut select = Select::new(schema.name, schema.table).filter(query.condition.clone());
        select.order_by = query.order_by;
        select.limit = query.limit;
        Ok((schema, select, plan))
    }

    fn loader(&self) -> BatchLoader<'_, E> {
        BatchLoader::new(
            &self.registry,
            &self.executor,
            &self.config.strictness,
            &self.observers,
        )
    }

    fn planner(&self) -> EagerPlanner<'_, E> {
        EagerPlanner::new(self.loader(), Hydrator::new(&self.observers))
    }

    fn lazy_guard(&self) -> LazyGuard<'_, E> {
        LazyGuard::new(
            self.loader(),
            Hydrator::new(&self.observers),
            &self.config.strictness,
            &self.n1_tracker,
        )
    }
}
