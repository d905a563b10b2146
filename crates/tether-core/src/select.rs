//! Structured filters handed to the execution collaborator.
//!
//! A [`Select`] describes one fetch: an equality or IN-set filter on a
//! column, an optional per-group selection rule (one-of-many), and an
//! optional join to one intermediate table (through relationships).
//! Executors may evaluate it directly or render it to SQL with
//! [`Select::to_sql`].

use crate::relationship::{Aggregate, Direction, OrderBy};
use crate::row::Row;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt::Write;

/// Alias under which a joined select exposes the intermediate's key column.
pub const THROUGH_KEY_ALIAS: &str = "__tether_through_key";

const GROUP_ALIAS: &str = "__tether_group";
const PICK_ALIAS: &str = "__tether_pick";

/// SQL dialect for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier, doubling embedded quote characters.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }

    fn qualified(self, table: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }
}

/// Row filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Every row.
    All,
    /// `column = value`.
    Eq(String, Value),
    /// `column IN (values)`.
    In(String, Vec<Value>),
    /// `column > value`, used for keyset pagination.
    After(String, Value),
    /// Every inner condition holds.
    And(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(column.into(), value.into())
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::In(column.into(), values)
    }

    pub fn after(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::After(column.into(), value.into())
    }

    /// Conjunction of `self` and `other`, flattening `All`.
    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::All, c) | (c, Condition::All) => c,
            (Condition::And(mut left), Condition::And(right)) => {
                left.extend(right);
                Condition::And(left)
            }
            (Condition::And(mut left), c) => {
                left.push(c);
                Condition::And(left)
            }
            (c, Condition::And(mut right)) => {
                right.insert(0, c);
                Condition::And(right)
            }
            (a, b) => Condition::And(vec![a, b]),
        }
    }

    /// Evaluate against a row with SQL semantics: NULL never matches.
    pub fn matches(&self, row: &Row) -> bool {
        let value = |column: &str| row.get_by_name(column).filter(|v| !v.is_null());
        match self {
            Condition::All => true,
            Condition::Eq(column, expected) => {
                value(column).is_some_and(|v| v.compare(expected) == Some(Ordering::Equal))
            }
            Condition::In(column, values) => value(column).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| v.compare(candidate) == Some(Ordering::Equal))
            }),
            Condition::After(column, bound) => {
                value(column).is_some_and(|v| v.compare(bound) == Some(Ordering::Greater))
            }
            Condition::And(all) => all.iter().all(|c| c.matches(row)),
        }
    }

    fn render(
        &self,
        dialect: Dialect,
        table: &str,
        params: &mut Vec<Value>,
    ) -> Option<String> {
        match self {
            Condition::All => None,
            Condition::Eq(column, value) => Some(format!(
                "{} = {}",
                dialect.qualified(table, column),
                bind(dialect, params, value)
            )),
            Condition::After(column, value) => Some(format!(
                "{} > {}",
                dialect.qualified(table, column),
                bind(dialect, params, value)
            )),
            Condition::In(_, values) if values.is_empty() => Some("1 = 0".to_string()),
            Condition::In(column, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| bind(dialect, params, v))
                    .collect();
                Some(format!(
                    "{} IN ({})",
                    dialect.qualified(table, column),
                    placeholders.join(", ")
                ))
            }
            Condition::And(all) => {
                let parts: Vec<String> = all
                    .iter()
                    .filter_map(|c| c.render(dialect, table, params))
                    .collect();
                match parts.len() {
                    0 => None,
                    1 => parts.into_iter().next(),
                    _ => Some(format!("({})", parts.join(" AND "))),
                }
            }
        }
    }
}

fn bind(dialect: Dialect, params: &mut Vec<Value>, value: &Value) -> String {
    params.push(value.clone());
    dialect.placeholder(params.len())
}

/// Keep one row per `partition_by` group: the one holding the aggregate
/// of `column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSelection {
    pub partition_by: &'static str,
    pub column: &'static str,
    pub aggregate: Aggregate,
}

/// Join from the target table to one intermediate table.
///
/// Renders as
/// `target JOIN intermediate ON intermediate.intermediate_column = target.target_column`
/// with `condition` applied to the intermediate and `key_column` of the
/// intermediate exposed as [`THROUGH_KEY_ALIAS`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughJoin {
    pub table: &'static str,
    pub intermediate_column: &'static str,
    pub target_column: &'static str,
    pub key_column: &'static str,
    pub condition: Condition,
}

/// One structured fetch.
///
/// `selection` and `join` are not combined: the loader only issues
/// grouped selects for one-of-many and joined selects for through kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Entity type the rows map to.
    pub entity: &'static str,
    pub table: &'static str,
    pub condition: Condition,
    pub selection: Option<GroupSelection>,
    pub join: Option<ThroughJoin>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Select {
    /// Select every row of `table`.
    pub fn new(entity: &'static str, table: &'static str) -> Self {
        Self {
            entity,
            table,
            condition: Condition::All,
            selection: None,
            join: None,
            order_by: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = self.condition.and(condition);
        self
    }

    #[must_use]
    pub fn one_per_group(mut self, selection: GroupSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    #[must_use]
    pub fn join(mut self, join: ThroughJoin) -> Self {
        self.join = Some(join);
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

    /// Render parameterized SQL for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let table = dialect.quote_identifier(self.table);
        let mut sql = format!("SELECT {table}.*");
        let mut conditions = Vec::new();

        if let Some(join) = &self.join {
            let _ = write!(
                sql,
                ", {} AS {} FROM {table} INNER JOIN {} ON {} = {}",
                dialect.qualified(join.table, join.key_column),
                dialect.quote_identifier(THROUGH_KEY_ALIAS),
                dialect.quote_identifier(join.table),
                dialect.qualified(join.table, join.intermediate_column),
                dialect.qualified(self.table, join.target_column),
            );
            conditions.extend(join.condition.render(dialect, join.table, &mut params));
            conditions.extend(self.condition.render(dialect, self.table, &mut params));
        } else if let Some(group) = &self.selection {
            let partition = dialect.quote_identifier(group.partition_by);
            let mut inner = format!(
                "SELECT {partition}, {}({}) AS {} FROM {table}",
                group.aggregate.as_sql(),
                dialect.quote_identifier(group.column),
                dialect.quote_identifier(PICK_ALIAS),
            );
            if let Some(filter) = self.condition.render(dialect, self.table, &mut params) {
                let _ = write!(inner, " WHERE {filter}");
            }
            let _ = write!(inner, " GROUP BY {partition}");
            let _ = write!(
                sql,
                " FROM {table} INNER JOIN ({inner}) AS {} ON {} = {} AND {} = {}",
                dialect.quote_identifier(GROUP_ALIAS),
                dialect.qualified(GROUP_ALIAS, group.partition_by),
                dialect.qualified(self.table, group.partition_by),
                dialect.qualified(GROUP_ALIAS, PICK_ALIAS),
                dialect.qualified(self.table, group.column),
            );
        } else {
            let _ = write!(sql, " FROM {table}");
            conditions.extend(self.condition.render(dialect, self.table, &mut params));
        }

        if !conditions.is_empty() {
            let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
        }
        if let Some(order) = &self.order_by {
            let _ = write!(
                sql,
                " ORDER BY {} {}",
                dialect.qualified(self.table, order.column),
                order.direction.as_sql()
            );
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_list_postgres() {
        let select = Select::new("order", "orders").filter(Condition::in_list(
            "customer_id",
            vec![Value::BigInt(1), Value::BigInt(2)],
        ));
        let (sql, params) = select.to_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"SELECT "orders".* FROM "orders" WHERE "orders"."customer_id" IN ($1, $2)"#
        );
        assert_eq!(params, vec![Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn test_order_and_limit_sqlite() {
        let select = Select::new("order", "orders")
            .filter(Condition::after("id", 10))
            .order_by("id", Direction::Asc)
            .limit(50);
        let (sql, params) = select.to_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            r#"SELECT "orders".* FROM "orders" WHERE "orders"."id" > ?1 ORDER BY "orders"."id" ASC LIMIT 50"#
        );
        assert_eq!(params, vec![Value::BigInt(10)]);
    }

    #[test]
    fn test_one_per_group_renders_single_statement() {
        let select = Select::new("order", "orders")
            .filter(Condition::in_list("customer_id", vec![Value::BigInt(1)]))
            .one_per_group(GroupSelection {
                partition_by: "customer_id",
                column: "id",
                aggregate: Aggregate::Max,
            });
        let (sql, _) = select.to_sql(Dialect::Mysql);
        assert_eq!(
            sql,
            "SELECT `orders`.* FROM `orders` INNER JOIN (SELECT `customer_id`, MAX(`id`) AS `__tether_pick` \
             FROM `orders` WHERE `orders`.`customer_id` IN (?) GROUP BY `customer_id`) AS `__tether_group` \
             ON `__tether_group`.`customer_id` = `orders`.`customer_id` \
             AND `__tether_group`.`__tether_pick` = `orders`.`id`"
        );
    }

    #[test]
    fn test_through_join() {
        let select = Select::new("sale", "sales").join(ThroughJoin {
            table: "employees",
            intermediate_column: "id",
            target_column: "employee_id",
            key_column: "branch_id",
            condition: Condition::in_list("branch_id", vec![Value::BigInt(4)]),
        });
        let (sql, params) = select.to_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            r#"SELECT "sales".*, "employees"."branch_id" AS "__tether_through_key" FROM "sales" INNER JOIN "employees" ON "employees"."id" = "sales"."employee_id" WHERE "employees"."branch_id" IN ($1)"#
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(Dialect::Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_condition_matches_sql_null_semantics() {
        let row = Row::new(
            vec!["id".into(), "team_id".into()],
            vec![Value::BigInt(3), Value::Null],
        );
        assert!(Condition::eq("id", 3).matches(&row));
        assert!(!Condition::eq("team_id", Value::Null).matches(&row));
        assert!(!Condition::in_list("team_id", vec![Value::Null]).matches(&row));
        assert!(Condition::after("id", 2).matches(&row));
        assert!(!Condition::eq("missing", 1).matches(&row));
        assert!(
            Condition::eq("id", 3)
                .and(Condition::after("id", 1))
                .matches(&row)
        );
    }

    #[test]
    fn test_and_flattens_all() {
        let c = Condition::All.and(Condition::eq("id", 1));
        assert_eq!(c, Condition::eq("id", 1));
        let c = c.and(Condition::eq("x", 2)).and(Condition::eq("y", 3));
        assert!(matches!(c, Condition::And(ref v) if v.len() == 3));
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let (sql, params) = Select::new("order", "orders")
            .filter(Condition::in_list("customer_id", Vec::new()))
            .to_sql(Dialect::Postgres);
        assert!(sql.ends_with("WHERE 1 = 0"));
        assert!(params.is_empty());
    }
}
