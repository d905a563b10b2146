//! Shared fixtures: a store of customers with orders, and branches with
//! employees and sales.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use std::future::Future;
use std::sync::Arc;
use tether::prelude::*;
use tether::{RelationshipKind, row};

pub fn block_on<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    for schema in [
        EntitySchema::new("customer", "customers").columns(&["name"]),
        EntitySchema::new("order", "orders")
            .columns(&["customer_id", "created_at", "total"])
            .default_value("status", "pending"),
        EntitySchema::new("line", "lines").columns(&["order_id", "product_id"]),
        EntitySchema::new("product", "products").columns(&["name"]),
        EntitySchema::new("branch", "branches").columns(&["name"]),
        EntitySchema::new("employee", "employees").columns(&["branch_id", "name"]),
        EntitySchema::new("sale", "sales").columns(&["employee_id", "amount"]),
    ] {
        registry.register_entity(schema).expect("register entity");
    }

    let employees =
        || RelationshipDescriptor::has_many("employees", "branch", "employee", "branch_id");
    for descriptor in [
        RelationshipDescriptor::has_many("orders", "customer", "order", "customer_id")
            .order_by("id", Direction::Asc)
            .inverse("customer"),
        RelationshipDescriptor::has_one_of_many(
            "latest_order",
            "customer",
            "order",
            "customer_id",
            SelectionRule::max_by("created_at"),
        )
        .inverse("customer"),
        RelationshipDescriptor::belongs_to("customer", "order", "customer", "customer_id"),
        RelationshipDescriptor::has_many("lines", "order", "line", "order_id").inverse("order"),
        RelationshipDescriptor::belongs_to("product", "line", "product", "product_id"),
        employees(),
        RelationshipDescriptor::new("sales", "branch", "sale", RelationshipKind::ManyThrough)
            .foreign_key("employee_id")
            .through(employees()),
        RelationshipDescriptor::new(
            "sales_joined",
            "branch",
            "sale",
            RelationshipKind::ManyThrough,
        )
        .foreign_key("employee_id")
        .through(employees())
        .through_strategy(ThroughStrategy::Joined),
    ] {
        registry
            .register_relationship(descriptor)
            .expect("register relationship");
    }
    registry
}

/// Customers 1-3 with four orders each, customer 4 with none. Order `n` of
/// customer `c` has id `4 * (c - 1) + n` and `created_at` `100 * c + n`, so
/// the latest order of customer `c` is `4 * c`. Every order has two lines,
/// for products 1 and 2.
///
/// Branches 1-5 with two employees each and three sales per employee;
/// branch 6 has no employees.
pub fn executor() -> MemoryExecutor {
    let exec = MemoryExecutor::new();

    for c in 1..=4_i64 {
        exec.insert(
            "customers",
            row(&[
                ("id", Value::from(c)),
                ("name", Value::from(format!("customer {c}"))),
            ]),
        );
    }
    for c in 1..=3_i64 {
        for n in 1..=4_i64 {
            let id = 4 * (c - 1) + n;
            exec.insert(
                "orders",
                row(&[
                    ("id", id),
                    ("customer_id", c),
                    ("created_at", 100 * c + n),
                    ("total", 10 * n),
                ]),
            );
            for product in 1..=2_i64 {
                exec.insert(
                    "lines",
                    row(&[
                        ("id", 2 * (id - 1) + product),
                        ("order_id", id),
                        ("product_id", product),
                    ]),
                );
            }
        }
    }
    for p in 1..=2_i64 {
        exec.insert(
            "products",
            row(&[
                ("id", Value::from(p)),
                ("name", Value::from(format!("product {p}"))),
            ]),
        );
    }

    for b in 1..=6_i64 {
        exec.insert(
            "branches",
            row(&[
                ("id", Value::from(b)),
                ("name", Value::from(format!("branch {b}"))),
            ]),
        );
    }
    for b in 1..=5_i64 {
        for j in 1..=2_i64 {
            let employee = 2 * (b - 1) + j;
            exec.insert(
                "employees",
                row(&[
                    ("id", Value::from(employee)),
                    ("branch_id", Value::from(b)),
                    ("name", Value::from(format!("employee {employee}"))),
                ]),
            );
            for k in 1..=3_i64 {
                exec.insert(
                    "sales",
                    row(&[
                        ("id", 3 * (employee - 1) + k),
                        ("employee_id", employee),
                        ("amount", 5 * k),
                    ]),
                );
            }
        }
    }
    exec
}

/// A session over the shared fixtures.
pub fn session(config: SessionConfig) -> Session<Arc<MemoryExecutor>> {
    Session::with_config(registry(), Arc::new(executor()), config)
}

pub fn ids(entities: &[EntityRef]) -> Vec<i64> {
    let mut ids: Vec<i64> = entities
        .iter()
        .filter_map(|e| e.primary_key().as_i64())
        .collect();
    ids.sort_unstable();
    ids
}

pub fn id_of(entity: &EntityRef) -> i64 {
    entity.primary_key().as_i64().expect("integer primary key")
}
