//! Batch loading: one relationship for a whole set of parents.
//!
//! Each call issues a fixed number of queries no matter how many parents
//! it is given:
//!
//! | kind                         | queries |
//! |------------------------------|---------|
//! | many, one, one-of-many       | 1       |
//! | through, two-step            | 2       |
//! | through, joined              | 1       |
//!
//! and 0 when no parent carries a non-NULL key.

use crate::observer::Observers;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tether_core::{
    Condition, Cx, Dialect, EntityRef, EntitySchema, Error, GroupSelection, Key, Outcome,
    QueryExecutor, Registry, RelationshipDescriptor, RelationshipKind, Row, Select, Strictness,
    THROUGH_KEY_ALIAS, ThroughJoin, ThroughStrategy, Value,
};

/// Related entities grouped by parent key.
#[derive(Debug, Default)]
pub struct LoadedBatch {
    groups: HashMap<Key, Vec<EntityRef>>,
    /// Queries issued to build this batch.
    pub queries: usize,
}

impl LoadedBatch {
    /// Related entities for one parent key; empty when nothing matched.
    pub fn get(&self, key: &Key) -> &[EntityRef] {
        self.groups.get(key).map_or(&[], Vec::as_slice)
    }

    /// Number of parent keys with at least one related entity.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total related entities across all groups.
    pub fn related_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Entities built during one batch, keyed by type and primary key, so a
/// row seen twice maps to one instance.
type IdentityMap = HashMap<(&'static str, Key), EntityRef>;

/// Fetches one relationship for a set of parents.
pub struct BatchLoader<'a, E> {
    registry: &'a Registry,
    executor: &'a E,
    strictness: &'a Strictness,
    observers: &'a Observers,
}

impl<'a, E: QueryExecutor> BatchLoader<'a, E> {
    pub fn new(
        registry: &'a Registry,
        executor: &'a E,
        strictness: &'a Strictness,
        observers: &'a Observers,
    ) -> Self {
        Self {
            registry,
            executor,
            strictness,
            observers,
        }
    }

    /// Load `descriptor` for every parent and group the results by the
    /// parent's key.
    ///
    /// Parents sharing a key are queried once. A parent whose key is
    /// missing or NULL has no related rows.
    pub async fn load(
        &self,
        cx: &Cx,
        parents: &[EntityRef],
        descriptor: &RelationshipDescriptor,
    ) -> Outcome<LoadedBatch, Error> {
        let keys = distinct_keys(parents, descriptor.parent_key());
        tracing::debug!(
            entity = descriptor.source,
            relationship = descriptor.name,
            kind = %descriptor.kind,
            parents = parents.len(),
            keys = keys.len(),
            "Building load batch"
        );

        if keys.is_empty() {
            return Outcome::Ok(LoadedBatch::default());
        }

        let mut identity = IdentityMap::new();
        let batch = match (descriptor.intermediate(), descriptor.through_strategy) {
            (None, _) => self.load_direct(cx, descriptor, keys, &mut identity).await,
            (Some(hop), ThroughStrategy::TwoStep) => {
                self.load_two_step(cx, descriptor, hop, keys, &mut identity)
                    .await
            }
            (Some(hop), ThroughStrategy::Joined) => {
                self.load_joined(cx, descriptor, hop, keys, &mut identity)
                    .await
            }
        };

        if let Outcome::Ok(batch) = &batch {
            tracing::debug!(
                relationship = descriptor.name,
                queries = batch.queries,
                groups = batch.group_count(),
                related = batch.related_count(),
                "Batch load complete"
            );
        }
        batch
    }

    /// Fetch root entities for a select.
    pub async fn fetch_roots(&self, cx: &Cx, select: &Select) -> Outcome<Vec<EntityRef>, Error> {
        let schema = match self.registry.entity(select.entity) {
            Ok(schema) => schema,
            Err(e) => return Outcome::Err(e),
        };
        let mut identity = IdentityMap::new();
        match self.fetch(cx, &schema, select, &mut identity).await {
            Outcome::Ok(fetched) => Outcome::Ok(fetched.into_iter().map(|(_, e)| e).collect()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn load_direct(
        &self,
        cx: &Cx,
        descriptor: &RelationshipDescriptor,
        keys: Vec<Value>,
        identity: &mut IdentityMap,
    ) -> Outcome<LoadedBatch, Error> {
        let target = match self.registry.entity(descriptor.target) {
            Ok(schema) => schema,
            Err(e) => return Outcome::Err(e),
        };

        let mut select = Select::new(target.name, target.table)
            .filter(Condition::in_list(descriptor.foreign_key, keys));
        let rule = descriptor.selection;
        if let Some(rule) = rule {
            select = select.one_per_group(GroupSelection {
                partition_by: descriptor.foreign_key,
                column: rule.column_or(target.primary_key),
                aggregate: rule.aggregate,
            });
        }
        if let Some(order) = descriptor.order_by {
            select = select.order_by(order.column, order.direction);
        }

        let fetched = match self.fetch(cx, &target, &select, identity).await {
            Outcome::Ok(fetched) => fetched,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut groups: HashMap<Key, Vec<EntityRef>> = HashMap::new();
        // Compared value of the current pick per group, for one-of-many.
        let mut picked: HashMap<Key, Value> = HashMap::new();
        for (row, child) in fetched {
            let Some(key) = row_key(&row, descriptor.foreign_key) else {
                continue;
            };
            let group = groups.entry(key.clone()).or_default();
            match (descriptor.kind, rule) {
                (RelationshipKind::OneOfMany, Some(rule)) => {
                    let value = row
                        .get_by_name(rule.column_or(target.primary_key))
                        .cloned()
                        .unwrap_or(Value::Null);
                    let better = picked
                        .get(&key)
                        .is_none_or(|current| rule.prefers(&value, current));
                    if better {
                        picked.insert(key, value);
                        *group = vec![child];
                    }
                }
                (RelationshipKind::One, _) => {
                    if group.is_empty() {
                        group.push(child);
                    }
                }
                _ => group.push(child),
            }
        }

        Outcome::Ok(LoadedBatch { groups, queries: 1 })
    }

    async fn load_two_step(
        &self,
        cx: &Cx,
        descriptor: &RelationshipDescriptor,
        hop: &RelationshipDescriptor,
        keys: Vec<Value>,
        identity: &mut IdentityMap,
    ) -> Outcome<LoadedBatch, Error> {
        let (middle, target) = match self.through_schemas(descriptor, hop) {
            Ok(schemas) => schemas,
            Err(e) => return Outcome::Err(e),
        };

        let select = Select::new(middle.name, middle.table)
            .filter(Condition::in_list(hop.foreign_key, keys));
        let intermediates = match self.fetch(cx, &middle, &select, identity).await {
            Outcome::Ok(fetched) => fetched,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        // Intermediate join value -> parent keys reaching it.
        let mut links: HashMap<Key, Vec<Key>> = HashMap::new();
        let mut link_values = Vec::new();
        for (row, _) in &intermediates {
            let (Some(parent), Some(link)) = (
                row_key(row, hop.foreign_key),
                row_key(row, descriptor.local_key),
            ) else {
                continue;
            };
            let parents = links.entry(link.clone()).or_insert_with(|| {
                link_values.push(link.value().clone());
                Vec::new()
            });
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }

        if link_values.is_empty() {
            tracing::trace!(
                relationship = descriptor.name,
                "No intermediates matched; skipping target query"
            );
            return Outcome::Ok(LoadedBatch {
                groups: HashMap::new(),
                queries: 1,
            });
        }

        let mut select = Select::new(target.name, target.table)
            .filter(Condition::in_list(descriptor.foreign_key, link_values));
        if let Some(order) = descriptor.order_by {
            select = select.order_by(order.column, order.direction);
        }
        let fetched = match self.fetch(cx, &target, &select, identity).await {
            Outcome::Ok(fetched) => fetched,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut groups: HashMap<Key, Vec<EntityRef>> = HashMap::new();
        for (row, child) in fetched {
            let Some(parents) = row_key(&row, descriptor.foreign_key).and_then(|k| links.get(&k))
            else {
                continue;
            };
            for parent in parents {
                attach(
                    groups.entry(parent.clone()).or_default(),
                    &child,
                    descriptor.kind,
                );
            }
        }

        Outcome::Ok(LoadedBatch { groups, queries: 2 })
    }

    async fn load_joined(
        &self,
        cx: &Cx,
        descriptor: &RelationshipDescriptor,
        hop: &RelationshipDescriptor,
        keys: Vec<Value>,
        identity: &mut IdentityMap,
    ) -> Outcome<LoadedBatch, Error> {
        let (middle, target) = match self.through_schemas(descriptor, hop) {
            Ok(schemas) => schemas,
            Err(e) => return Outcome::Err(e),
        };

        let mut select = Select::new(target.name, target.table).join(ThroughJoin {
            table: middle.table,
            intermediate_column: descriptor.local_key,
            target_column: descriptor.foreign_key,
            key_column: hop.foreign_key,
            condition: Condition::in_list(hop.foreign_key, keys),
        });
        if let Some(order) = descriptor.order_by {
            select = select.order_by(order.column, order.direction);
        }
        let fetched = match self.fetch(cx, &target, &select, identity).await {
            Outcome::Ok(fetched) => fetched,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut groups: HashMap<Key, Vec<EntityRef>> = HashMap::new();
        for (row, child) in fetched {
            let Some(parent) = row_key(&row, THROUGH_KEY_ALIAS) else {
                continue;
            };
            attach(groups.entry(parent).or_default(), &child, descriptor.kind);
        }

        Outcome::Ok(LoadedBatch { groups, queries: 1 })
    }

    fn through_schemas(
        &self,
        descriptor: &RelationshipDescriptor,
        hop: &RelationshipDescriptor,
    ) -> tether_core::Result<(Arc<EntitySchema>, Arc<EntitySchema>)> {
        Ok((
            self.registry.entity(hop.target)?,
            self.registry.entity(descriptor.target)?,
        ))
    }

    /// Run one select and map its rows, reusing instances already built in
    /// this batch.
    async fn fetch(
        &self,
        cx: &Cx,
        schema: &EntitySchema,
        select: &Select,
        identity: &mut IdentityMap,
    ) -> Outcome<Vec<(Row, EntityRef)>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            let (sql, params) = select.to_sql(Dialect::default());
            tracing::trace!(entity = select.entity, sql = %sql, params = params.len(), "Issuing select");
        }

        let rows = match self.executor.query(cx, select).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut fetched = Vec::with_capacity(rows.len());
        for row in rows {
            let entity = match schema.map_row(&row, self.strictness) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::debug!(entity = schema.name, error = %e, "Row mapping failed");
                    return Outcome::Err(e);
                }
            };
            let entity = match Key::new(entity.primary_key()) {
                Some(pk) => match identity.get(&(schema.name, pk.clone())) {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        let entity = entity.into_ref();
                        self.observers.retrieved(&entity);
                        identity.insert((schema.name, pk), Arc::clone(&entity));
                        entity
                    }
                },
                None => {
                    let entity = entity.into_ref();
                    self.observers.retrieved(&entity);
                    entity
                }
            };
            fetched.push((row, entity));
        }
        Outcome::Ok(fetched)
    }
}

/// Distinct non-NULL values of `column` across `parents`, in first-seen order.
fn distinct_keys(parents: &[EntityRef], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    parents
        .iter()
        .filter_map(|p| p.key_of(column))
        .filter(|k| seen.insert(k.clone()))
        .map(Key::into_value)
        .collect()
}

fn row_key(row: &Row, column: &str) -> Option<Key> {
    row.get_by_name(column).cloned().and_then(Key::new)
}

/// Add `child` to a through group once; a one-through group keeps its
/// first child.
fn attach(group: &mut Vec<EntityRef>, child: &EntityRef, kind: RelationshipKind) {
    if kind == RelationshipKind::OneThrough && !group.is_empty() {
        return;
    }
    if !group.iter().any(|c| Arc::ptr_eq(c, child)) {
        group.push(Arc::clone(child));
    }
}
