//! Relationship descriptors.
//!
//! A [`RelationshipDescriptor`] is declared once per entity type and
//! relationship name, validated when it is registered, and then shared
//! read-only (as `Arc<RelationshipDescriptor>`) by every load that uses it.
//!
//! Key naming follows the direction of the join:
//!
//! - `local_key` is a column on the side the join starts from,
//! - `foreign_key` is the column on the related side compared against it.
//!
//! For `Many`/`One`/`OneOfMany` the join starts at the source entity. For
//! the through kinds the first hop is the intermediate descriptor (source
//! to intermediate) and the outer keys join intermediate to target.

use crate::error::{Error, Result};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

/// The kind of relationship between two entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// One-to-many: a customer has many orders.
    Many,
    /// One-to-one, in either direction: a user has one profile, or an
    /// order belongs to one customer.
    One,
    /// One row picked out of a one-to-many group by a selection rule:
    /// a customer's latest order.
    OneOfMany,
    /// One-to-one through an intermediate entity.
    OneThrough,
    /// One-to-many through an intermediate entity: a branch's sales
    /// through its employees.
    ManyThrough,
}

impl RelationshipKind {
    /// Whether the relationship yields a collection.
    pub const fn is_many(self) -> bool {
        matches!(self, RelationshipKind::Many | RelationshipKind::ManyThrough)
    }

    /// Whether the relationship resolves through an intermediate entity.
    pub const fn is_through(self) -> bool {
        matches!(
            self,
            RelationshipKind::OneThrough | RelationshipKind::ManyThrough
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationshipKind::Many => "many",
            RelationshipKind::One => "one",
            RelationshipKind::OneOfMany => "one-of-many",
            RelationshipKind::OneThrough => "one-through",
            RelationshipKind::ManyThrough => "many-through",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate used by a selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Max,
    Min,
}

impl Aggregate {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
        }
    }
}

/// Picks one row per group for a `OneOfMany` relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRule {
    /// Column compared; `None` means the target's primary key.
    pub column: Option<&'static str>,
    pub aggregate: Aggregate,
}

impl SelectionRule {
    /// Row with the greatest primary key.
    pub const fn latest() -> Self {
        Self {
            column: None,
            aggregate: Aggregate::Max,
        }
    }

    /// Row with the smallest primary key.
    pub const fn oldest() -> Self {
        Self {
            column: None,
            aggregate: Aggregate::Min,
        }
    }

    /// Row with the greatest value in `column`.
    pub const fn max_by(column: &'static str) -> Self {
        Self {
            column: Some(column),
            aggregate: Aggregate::Max,
        }
    }

    /// Row with the smallest value in `column`.
    pub const fn min_by(column: &'static str) -> Self {
        Self {
            column: Some(column),
            aggregate: Aggregate::Min,
        }
    }

    /// The compared column, defaulting to the target primary key.
    pub fn column_or(&self, primary_key: &'static str) -> &'static str {
        self.column.unwrap_or(primary_key)
    }

    /// Whether `candidate` beats `current` under this rule.
    ///
    /// Ties keep the current row, so the first row seen in collaborator
    /// order wins.
    pub fn prefers(&self, candidate: &Value, current: &Value) -> bool {
        match (self.aggregate, candidate.compare(current)) {
            (Aggregate::Max, Some(Ordering::Greater)) | (Aggregate::Min, Some(Ordering::Less)) => {
                true
            }
            _ => false,
        }
    }
}

/// Sort direction for ordered relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Ordering applied to related rows within each parent's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub direction: Direction,
}

/// How a through relationship is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughStrategy {
    /// Fetch intermediates, then targets: two queries.
    #[default]
    TwoStep,
    /// Fetch targets joined to the intermediate table: one query.
    Joined,
}

/// Declaration of one relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDescriptor {
    /// Relationship name on the source entity.
    pub name: &'static str,
    /// Entity type the relationship is declared on.
    pub source: &'static str,
    /// Entity type the relationship yields.
    pub target: &'static str,
    pub kind: RelationshipKind,
    /// Column the join starts from (source, or intermediate for through kinds).
    pub local_key: &'static str,
    /// Column on the target compared against `local_key`.
    pub foreign_key: &'static str,
    /// First hop for through kinds: source to intermediate.
    pub through: Option<Box<RelationshipDescriptor>>,
    pub through_strategy: ThroughStrategy,
    pub selection: Option<SelectionRule>,
    pub order_by: Option<OrderBy>,
    /// Back-reference name set on each hydrated child.
    pub inverse: Option<&'static str>,
}

impl RelationshipDescriptor {
    /// Create a new relationship with required fields.
    ///
    /// `local_key` defaults to `"id"`; `foreign_key` must be set.
    #[must_use]
    pub fn new(
        name: &'static str,
        source: &'static str,
        target: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            source,
            target,
            kind,
            local_key: "id",
            foreign_key: "",
            through: None,
            through_strategy: ThroughStrategy::TwoStep,
            selection: None,
            order_by: None,
            inverse: None,
        }
    }

    /// `source` has many `target`s whose `foreign_key` references `source.id`.
    #[must_use]
    pub fn has_many(
        name: &'static str,
        source: &'static str,
        target: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self::new(name, source, target, RelationshipKind::Many).foreign_key(foreign_key)
    }

    /// `source` has one `target` whose `foreign_key` references `source.id`.
    #[must_use]
    pub fn has_one(
        name: &'static str,
        source: &'static str,
        target: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self::new(name, source, target, RelationshipKind::One).foreign_key(foreign_key)
    }

    /// `source.local_key` references `target.id`.
    #[must_use]
    pub fn belongs_to(
        name: &'static str,
        source: &'static str,
        target: &'static str,
        local_key: &'static str,
    ) -> Self {
        Self::new(name, source, target, RelationshipKind::One)
            .local_key(local_key)
            .foreign_key("id")
    }

    /// One `target` per source picked from a one-to-many group by `rule`.
    #[must_use]
    pub fn has_one_of_many(
        name: &'static str,
        source: &'static str,
        target: &'static str,
        foreign_key: &'static str,
        rule: SelectionRule,
    ) -> Self {
        Self::new(name, source, target, RelationshipKind::OneOfMany)
            .foreign_key(foreign_key)
            .selection(rule)
    }

    /// Set the column the join starts from.
    #[must_use]
    pub fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = key;
        self
    }

    /// Set the column on the target compared against the local key.
    #[must_use]
    pub fn foreign_key(mut self, key: &'static str) -> Self {
        self.foreign_key = key;
        self
    }

    /// Set the intermediate hop for through kinds.
    #[must_use]
    pub fn through(mut self, intermediate: RelationshipDescriptor) -> Self {
        self.through = Some(Box::new(intermediate));
        self
    }

    /// Set how a through relationship is fetched.
    #[must_use]
    pub fn through_strategy(mut self, strategy: ThroughStrategy) -> Self {
        self.through_strategy = strategy;
        self
    }

    /// Set the selection rule for `OneOfMany`.
    #[must_use]
    pub fn selection(mut self, rule: SelectionRule) -> Self {
        self.selection = Some(rule);
        self
    }

    /// Order related rows within each group.
    #[must_use]
    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy { column, direction });
        self
    }

    /// Record the parent on each hydrated child under `name`.
    #[must_use]
    pub fn inverse(mut self, name: &'static str) -> Self {
        self.inverse = Some(name);
        self
    }

    /// Column on the source entity whose value identifies a parent's group.
    pub fn parent_key(&self) -> &'static str {
        match &self.through {
            Some(hop) => hop.local_key,
            None => self.local_key,
        }
    }

    /// The intermediate hop, for through kinds.
    pub fn intermediate(&self) -> Option<&RelationshipDescriptor> {
        self.through.as_deref()
    }

    /// Check the declaration on its own, without looking at schemas.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(Error::config(self.source, Some(self.name), msg))
        };

        for (what, value) in [
            ("relationship name", self.name),
            ("source entity", self.source),
            ("target entity", self.target),
            ("local key", self.local_key),
            ("foreign key", self.foreign_key),
        ] {
            if value.is_empty() {
                return fail(format!("{what} is empty"));
            }
            if !is_identifier(value) {
                return fail(format!("{what} '{value}' is not a valid identifier"));
            }
        }

        match (self.kind, self.selection.is_some()) {
            (RelationshipKind::OneOfMany, false) => {
                return fail("one-of-many relationship requires a selection rule".to_string());
            }
            (kind, true) if kind != RelationshipKind::OneOfMany => {
                return fail(format!("{kind} relationship cannot take a selection rule"));
            }
            _ => {}
        }

        match (&self.through, self.kind.is_through()) {
            (None, true) => fail(format!(
                "{} relationship requires an intermediate descriptor",
                self.kind
            )),
            (Some(_), false) => fail(format!(
                "{} relationship cannot take an intermediate descriptor",
                self.kind
            )),
            (Some(hop), true) => {
                if hop.kind.is_through() || hop.kind == RelationshipKind::OneOfMany {
                    return fail(format!(
                        "intermediate hop '{}' must be a plain many or one relationship",
                        hop.name
                    ));
                }
                if hop.source != self.source {
                    return fail(format!(
                        "intermediate hop '{}' starts at '{}' but the relationship is declared on '{}'",
                        hop.name, hop.source, self.source
                    ));
                }
                hop.validate()
            }
            (None, false) => Ok(()),
        }
    }
}

/// Check whether a key or entity name is a plain SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
        })
        .is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> RelationshipDescriptor {
        RelationshipDescriptor::has_many("employees", "branch", "employee", "branch_id")
    }

    #[test]
    fn test_builder_chain() {
        let rel = RelationshipDescriptor::has_many("orders", "customer", "order", "customer_id")
            .order_by("placed_at", Direction::Desc)
            .inverse("customer");
        assert_eq!(rel.kind, RelationshipKind::Many);
        assert_eq!(rel.local_key, "id");
        assert_eq!(rel.foreign_key, "customer_id");
        assert_eq!(rel.parent_key(), "id");
        assert_eq!(rel.inverse, Some("customer"));
        assert!(rel.validate().is_ok());
    }

    #[test]
    fn test_belongs_to_keys() {
        let rel = RelationshipDescriptor::belongs_to("customer", "order", "customer", "customer_id");
        assert_eq!(rel.kind, RelationshipKind::One);
        assert_eq!(rel.local_key, "customer_id");
        assert_eq!(rel.foreign_key, "id");
    }

    #[test]
    fn test_empty_foreign_key_rejected() {
        let rel = RelationshipDescriptor::new("orders", "customer", "order", RelationshipKind::Many);
        let err = rel.validate().unwrap_err();
        assert!(err.to_string().contains("foreign key is empty"));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let rel = RelationshipDescriptor::has_many("orders", "customer", "order", "customer id");
        assert!(matches!(rel.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_one_of_many_requires_rule() {
        let rel = RelationshipDescriptor::new(
            "latest_order",
            "customer",
            "order",
            RelationshipKind::OneOfMany,
        )
        .foreign_key("customer_id");
        assert!(rel.validate().is_err());

        let rel = rel.selection(SelectionRule::latest());
        assert!(rel.validate().is_ok());
    }

    #[test]
    fn test_rule_rejected_on_plain_many() {
        let rel = RelationshipDescriptor::has_many("orders", "customer", "order", "customer_id")
            .selection(SelectionRule::latest());
        assert!(rel.validate().is_err());
    }

    #[test]
    fn test_through_requires_matching_source() {
        let ok = RelationshipDescriptor::new("sales", "branch", "sale", RelationshipKind::ManyThrough)
            .through(employees())
            .foreign_key("employee_id");
        assert!(ok.validate().is_ok());
        assert_eq!(ok.parent_key(), "id");

        let wrong = RelationshipDescriptor::new("sales", "region", "sale", RelationshipKind::ManyThrough)
            .through(employees())
            .foreign_key("employee_id");
        let err = wrong.validate().unwrap_err();
        assert!(err.to_string().contains("starts at 'branch'"));
    }

    #[test]
    fn test_through_kind_requires_intermediate() {
        let rel = RelationshipDescriptor::new("sales", "branch", "sale", RelationshipKind::ManyThrough)
            .foreign_key("employee_id");
        assert!(rel.validate().is_err());
    }

    #[test]
    fn test_selection_rule_prefers() {
        let latest = SelectionRule::latest();
        assert!(latest.prefers(&Value::BigInt(5), &Value::BigInt(3)));
        assert!(!latest.prefers(&Value::BigInt(3), &Value::BigInt(3)));
        let cheapest = SelectionRule::min_by("price");
        assert!(cheapest.prefers(&Value::Double(1.0), &Value::Double(2.5)));
        assert_eq!(cheapest.column_or("id"), "price");
        assert_eq!(latest.column_or("id"), "id");
    }
}
