mod common;

use common::{block_on, expect_err, id_of, session, unwrap_outcome};
use tether::prelude::*;

fn strict_config() -> SessionConfig {
    serde_json::from_str(r#"{"strictness": {"lazy_loading": "strict"}}"#)
        .expect("parse session config")
}

#[test]
fn strict_mode_rejects_lazy_access_without_querying() {
    let cx = Cx::for_testing();
    let session = session(strict_config());
    assert_eq!(session.config().strictness.lazy_loading, LazyLoading::Strict);

    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));
    session.executor().reset_counters();

    let err = expect_err(block_on(session.relation(&cx, &customers[0], "orders")));
    assert!(err.is_lazy_access_violation());
    assert_eq!(session.executor().query_count(), 0);
    assert!(matches!(customers[0].slot_state("orders"), SlotState::Unloaded));
    assert_eq!(session.n1_stats().total_loads, 0);
}

#[test]
fn strict_mode_serves_eager_loaded_relationships() {
    let cx = Cx::for_testing();
    let session = session(strict_config());

    let customers = unwrap_outcome(block_on(
        session.fetch(&cx, Query::new("customer").with("latest_order")),
    ));
    session.executor().reset_counters();

    let latest = unwrap_outcome(block_on(session.relation(&cx, &customers[0], "latest_order")));
    assert!(latest.one().is_some());
    assert_eq!(session.executor().query_count(), 0);

    // Other relationships of the same entity stay guarded.
    let err = expect_err(block_on(session.relation(&cx, &customers[0], "orders")));
    assert!(matches!(err, Error::LazyAccess(_)));
}

#[test]
fn strict_mode_treats_failed_slots_as_violations() {
    let cx = Cx::for_testing();
    let session = session(strict_config());
    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));

    session.executor().fail_on("orders", || Error::Timeout);
    expect_err(block_on(session.load(&cx, &customers, &["orders"])));
    assert!(matches!(customers[0].slot_state("orders"), SlotState::Failed(_)));

    session.executor().clear_failures();
    let err = expect_err(block_on(session.relation(&cx, &customers[0], "orders")));
    assert!(err.is_lazy_access_violation());
}

#[test]
fn permissive_mode_loads_once_per_slot() {
    let cx = Cx::for_testing();
    let session = session(SessionConfig::default());
    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));
    session.executor().reset_counters();

    let first = unwrap_outcome(block_on(session.relation(&cx, &customers[0], "orders")));
    assert_eq!(first.len(), 4);
    assert_eq!(session.executor().query_count(), 1);
    assert!(customers[0].is_loaded("orders"));

    let again = unwrap_outcome(block_on(session.relation(&cx, &customers[0], "orders")));
    assert_eq!(again.len(), 4);
    assert_eq!(session.executor().query_count(), 1);
    assert_eq!(session.n1_count("customer", "orders"), 1);

    // Back-references are set for lazily loaded children too.
    for order in first.iter() {
        let back = order.back_reference("customer").expect("back-reference");
        assert_eq!(id_of(&back), id_of(&customers[0]));
    }
}

#[test]
fn permissive_mode_retries_failed_slots() {
    let cx = Cx::for_testing();
    let session = session(SessionConfig::default());
    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));

    session.executor().fail_on("orders", || Error::Timeout);
    let err = expect_err(block_on(session.relation(&cx, &customers[1], "orders")));
    assert!(matches!(err, Error::Timeout));
    assert!(matches!(customers[1].slot_state("orders"), SlotState::Failed(_)));

    session.executor().clear_failures();
    let orders = unwrap_outcome(block_on(session.relation(&cx, &customers[1], "orders")));
    assert_eq!(orders.len(), 4);
}

#[test]
fn lazy_loads_in_a_loop_are_counted_as_n_plus_one() {
    let cx = Cx::for_testing();
    let session = session(SessionConfig::default().n1_threshold(3));
    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));
    session.executor().reset_counters();

    for customer in &customers {
        unwrap_outcome(block_on(session.relation(&cx, customer, "orders")));
    }
    assert_eq!(session.executor().query_count(), customers.len());
    assert_eq!(session.n1_count("customer", "orders"), 4);

    let stats = session.n1_stats();
    assert_eq!(stats.total_loads, 4);
    assert_eq!(stats.relationships_loaded, 1);
    assert_eq!(stats.potential_n1, 1);

    session.reset_n1_tracking();
    assert_eq!(session.n1_stats(), tether::N1Stats::default());
}

#[test]
fn eager_loading_avoids_the_lazy_loop() {
    let cx = Cx::for_testing();
    let session = session(SessionConfig::default());
    let customers = unwrap_outcome(block_on(
        session.fetch(&cx, Query::new("customer").with("orders")),
    ));
    session.executor().reset_counters();

    for customer in &customers {
        unwrap_outcome(block_on(session.relation(&cx, customer, "orders")));
    }
    assert_eq!(session.executor().query_count(), 0);
    assert_eq!(session.n1_stats().total_loads, 0);
}

#[test]
fn belongs_to_lazy_access_yields_one() {
    let cx = Cx::for_testing();
    let session = session(SessionConfig::default());
    let orders = unwrap_outcome(block_on(
        session.fetch(&cx, Query::new("order").filter(Condition::eq("id", 6))),
    ));

    let owner = unwrap_outcome(block_on(session.relation(&cx, &orders[0], "customer")));
    let customer = owner.one().expect("order has a customer");
    assert_eq!(id_of(customer), 2);
}

#[test]
fn unknown_relationship_is_a_config_error() {
    let cx = Cx::for_testing();
    let session = session(SessionConfig::default());
    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));
    session.executor().reset_counters();

    let err = expect_err(block_on(session.relation(&cx, &customers[0], "refunds")));
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(session.executor().query_count(), 0);
}

#[test]
fn missing_attribute_access_follows_strictness() {
    let cx = Cx::for_testing();
    let lenient = session(SessionConfig::default());
    let customers = unwrap_outcome(block_on(lenient.fetch(&cx, Query::new("customer"))));
    assert_eq!(
        lenient.attribute(&customers[0], "email").expect("lenient read"),
        None
    );

    let strictness = Strictness::permissive().prevent_missing_attributes(true);
    let strict = session(SessionConfig::default().strictness(strictness));
    let err = strict
        .attribute(&customers[0], "email")
        .expect_err("missing attribute rejected");
    assert!(matches!(err, Error::MissingAttribute(_)));
    assert_eq!(
        strict.attribute(&customers[0], "name").expect("present attribute"),
        Some(Value::from("customer 1"))
    );
}
