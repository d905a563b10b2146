//! In-memory query executor.
//!
//! [`MemoryExecutor`] evaluates [`Select`]s against tables of rows held in
//! memory. It counts and records every select it receives and can be told
//! to fail selects against a table, which makes it the reference executor
//! for tests.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tether_core::{
    Aggregate, Cx, Direction, Error, Outcome, QueryErrorKind, QueryExecutor, Row, Select,
    THROUGH_KEY_ALIAS, Value,
};

type FailureFn = Box<dyn Fn() -> Error + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    selects: Vec<Select>,
    failures: HashMap<String, FailureFn>,
}

/// Executor over in-memory tables.
#[derive(Default)]
pub struct MemoryExecutor {
    state: Mutex<MemoryState>,
}

impl std::fmt::Debug for MemoryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let tables: HashMap<&str, usize> = state
            .tables
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.len()))
            .collect();
        f.debug_struct("MemoryExecutor")
            .field("tables", &tables)
            .field("queries", &state.selects.len())
            .finish_non_exhaustive()
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row<V: Into<Value> + Clone>(pairs: &[(&str, V)]) -> Row {
    let (names, values) = pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone().into()))
        .unzip();
    Row::new(names, values)
}

impl MemoryExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create `table` if needed; an empty table answers selects with no rows.
    pub fn create_table(&self, table: &str) {
        self.lock().tables.entry(table.to_string()).or_default();
    }

    /// Append one row to `table`.
    pub fn insert(&self, table: &str, row: Row) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Append rows to `table`.
    pub fn insert_all(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Fail every select touching `table` with the error `f` builds.
    pub fn fail_on(&self, table: &str, f: impl Fn() -> Error + Send + Sync + 'static) {
        self.lock().failures.insert(table.to_string(), Box::new(f));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Selects received so far, including failed ones.
    pub fn query_count(&self) -> usize {
        self.lock().selects.len()
    }

    /// Copies of the selects received so far.
    pub fn selects(&self) -> Vec<Select> {
        self.lock().selects.clone()
    }

    /// Forget recorded selects.
    pub fn reset_counters(&self) {
        self.lock().selects.clear();
    }

    fn run(&self, select: &Select) -> Result<Vec<Row>, Error> {
        let mut state = self.lock();
        state.selects.push(select.clone());

        let touched = std::iter::once(select.table).chain(select.join.as_ref().map(|j| j.table));
        for table in touched {
            if let Some(fail) = state.failures.get(table) {
                return Err(fail());
            }
        }

        let table = |name: &str| {
            state.tables.get(name).ok_or_else(|| {
                Error::query(QueryErrorKind::NotFound, format!("no such table: {name}"))
            })
        };
        let rows = table(select.table)?;

        let mut result: Vec<Row> = match &select.join {
            Some(join) => {
                let middle = table(join.table)?;
                let mut joined = Vec::new();
                for target in rows.iter().filter(|r| select.condition.matches(r)) {
                    let Some(target_value) = target.get_by_name(join.target_column) else {
                        continue;
                    };
                    for mid in middle.iter().filter(|m| join.condition.matches(m)) {
                        let linked = mid
                            .get_by_name(join.intermediate_column)
                            .is_some_and(|v| equal(v, target_value));
                        if linked {
                            let key = mid.get_by_name(join.key_column).cloned();
                            joined.push(with_column(
                                target,
                                THROUGH_KEY_ALIAS,
                                key.unwrap_or(Value::Null),
                            ));
                        }
                    }
                }
                joined
            }
            None => rows
                .iter()
                .filter(|r| select.condition.matches(r))
                .cloned()
                .collect(),
        };

        if let Some(group) = &select.selection {
            // Aggregate per partition, then keep rows holding it.
            let mut best: Vec<(Value, Value)> = Vec::new();
            for r in &result {
                let (Some(part), Some(value)) = (
                    r.get_by_name(group.partition_by),
                    r.get_by_name(group.column),
                ) else {
                    continue;
                };
                if part.is_null() || value.is_null() {
                    continue;
                }
                match best.iter_mut().find(|(p, _)| equal(p, part)) {
                    Some((_, current)) => {
                        let wins = match (group.aggregate, value.compare(current)) {
                            (Aggregate::Max, Some(Ordering::Greater))
                            | (Aggregate::Min, Some(Ordering::Less)) => true,
                            _ => false,
                        };
                        if wins {
                            *current = value.clone();
                        }
                    }
                    None => best.push((part.clone(), value.clone())),
                }
            }
            result.retain(|r| {
                let (Some(part), Some(value)) = (
                    r.get_by_name(group.partition_by),
                    r.get_by_name(group.column),
                ) else {
                    return false;
                };
                best.iter()
                    .any(|(p, v)| equal(p, part) && equal(v, value))
            });
        }

        if let Some(order) = &select.order_by {
            result.sort_by(|a, b| {
                let ord = match (a.get_by_name(order.column), b.get_by_name(order.column)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = select.limit {
            result.truncate(limit);
        }

        tracing::trace!(
            table = select.table,
            rows = result.len(),
            "Evaluated in-memory select"
        );
        Ok(result)
    }
}

impl QueryExecutor for MemoryExecutor {
    fn query(
        &self,
        cx: &Cx,
        select: &Select,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let outcome = match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => match self.run(select) {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            },
        };
        async move { outcome }
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    !a.is_null() && a.compare(b) == Some(Ordering::Equal)
}

fn with_column(row: &Row, name: &str, value: Value) -> Row {
    let (names, values): (Vec<String>, Vec<Value>) = row
        .iter()
        .map(|(column, v)| (column.to_string(), v.clone()))
        .chain(std::iter::once((name.to_string(), value)))
        .unzip();
    Row::new(names, values)
}
