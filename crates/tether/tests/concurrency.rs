mod common;

use asupersync::CancelKind;
use common::{block_on, unwrap_outcome};
use std::future::{Future, poll_fn};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;
use tether::prelude::*;

/// Cancels the caller's context when the `at`-th query arrives.
struct CancelAfter {
    inner: MemoryExecutor,
    at: usize,
    seen: AtomicUsize,
}

impl CancelAfter {
    fn new(at: usize) -> Self {
        Self {
            inner: common::executor(),
            at,
            seen: AtomicUsize::new(0),
        }
    }
}

impl QueryExecutor for CancelAfter {
    fn query(
        &self,
        cx: &Cx,
        select: &tether::Select,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.at {
            cx.cancel_with(CancelKind::User, Some("shutdown"));
        }
        self.inner.query(cx, select)
    }
}

/// Answers every query after yielding to the scheduler once.
struct Yielding {
    inner: MemoryExecutor,
}

impl QueryExecutor for Yielding {
    fn query(
        &self,
        cx: &Cx,
        select: &tether::Select,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let answer = self.inner.query(cx, select);
        async move {
            asupersync::runtime::yield_now().await;
            answer.await
        }
    }
}

/// Drive two futures on one task until both finish.
async fn both<A: Future, B: Future>(a: A, b: B) -> (A::Output, B::Output) {
    let mut a = pin!(a);
    let mut b = pin!(b);
    let (mut left, mut right) = (None, None);
    poll_fn(|task| {
        if left.is_none() {
            if let Poll::Ready(v) = a.as_mut().poll(task) {
                left = Some(v);
            }
        }
        if right.is_none() {
            if let Poll::Ready(v) = b.as_mut().poll(task) {
                right = Some(v);
            }
        }
        match (left.take(), right.take()) {
            (Some(l), Some(r)) => Poll::Ready((l, r)),
            (l, r) => {
                left = l;
                right = r;
                Poll::Pending
            }
        }
    })
    .await
}

fn expect_cancelled<T: std::fmt::Debug>(outcome: Outcome<T, Error>) {
    match outcome {
        Outcome::Cancelled(reason) => assert_eq!(reason.kind, CancelKind::User),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

fn attempted(session: &Session<CancelAfter>) -> usize {
    session.executor().seen.load(Ordering::SeqCst)
}

/// Tables of the queries that were answered rather than cancelled.
fn answered_tables(session: &Session<CancelAfter>) -> Vec<&'static str> {
    session
        .executor()
        .inner
        .selects()
        .iter()
        .map(|s| s.table)
        .collect()
}

#[test]
fn cancellation_on_the_last_hop_fails_every_touched_slot() {
    // Query 1 fetches the customers; 2 and 3 are orders and latest_order;
    // 4 is lines.
    let session = Session::new(common::registry(), CancelAfter::new(4));
    let customers = unwrap_outcome(block_on(
        session.fetch(&Cx::for_testing(), Query::new("customer")),
    ));

    let cx = Cx::for_testing();
    expect_cancelled(block_on(session.load(
        &cx,
        &customers,
        &["orders.lines", "latest_order"],
    )));

    assert_eq!(attempted(&session), 4);
    assert!(!answered_tables(&session).contains(&"lines"));
    for customer in &customers {
        assert!(matches!(customer.slot_state("orders"), SlotState::Failed(_)));
        assert!(matches!(customer.slot_state("latest_order"), SlotState::Failed(_)));
        assert!(!customer.is_loaded("orders"));
        assert!(!customer.is_loaded("latest_order"));
    }
}

#[test]
fn cancellation_stops_issuing_queries() {
    let session = Session::new(common::registry(), CancelAfter::new(2));
    let customers = unwrap_outcome(block_on(
        session.fetch(&Cx::for_testing(), Query::new("customer")),
    ));

    let cx = Cx::for_testing();
    expect_cancelled(block_on(session.load(
        &cx,
        &customers,
        &["orders.lines", "latest_order"],
    )));

    assert_eq!(attempted(&session), 2);
    assert_eq!(answered_tables(&session), vec!["customers"]);
    for customer in &customers {
        assert!(matches!(customer.slot_state("orders"), SlotState::Failed(_)));
        assert!(matches!(customer.slot_state("latest_order"), SlotState::Failed(_)));
    }

    // A fresh context retries the failed slots.
    let report = unwrap_outcome(block_on(session.load(
        &Cx::for_testing(),
        &customers,
        &["orders.lines", "latest_order"],
    )));
    assert_eq!(report.queries, 3);
    assert!(customers.iter().all(|c| c.is_loaded("latest_order")));
    let orders = customers[0].relation("orders").expect("orders loaded");
    assert!(orders.iter().all(|o| o.is_loaded("lines")));
}

#[test]
fn cancelled_lazy_access_fails_the_slot() {
    let session = Session::new(common::registry(), CancelAfter::new(2));
    let customers = unwrap_outcome(block_on(
        session.fetch(&Cx::for_testing(), Query::new("customer")),
    ));

    let cx = Cx::for_testing();
    expect_cancelled(block_on(session.relation(&cx, &customers[0], "orders")));
    assert!(matches!(customers[0].slot_state("orders"), SlotState::Failed(_)));
}

#[test]
fn concurrent_lazy_access_to_one_slot_issues_one_query() {
    let cx = Cx::for_testing();
    let executor = Yielding {
        inner: common::executor(),
    };
    let session = Session::new(common::registry(), Arc::new(executor));
    let customers = unwrap_outcome(block_on(session.fetch(&cx, Query::new("customer"))));
    session.executor().inner.reset_counters();

    let (first, second) = block_on(both(
        session.relation(&cx, &customers[0], "orders"),
        session.relation(&cx, &customers[0], "orders"),
    ));
    let (first, second) = (unwrap_outcome(first), unwrap_outcome(second));

    assert_eq!(session.executor().inner.query_count(), 1);
    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);
    assert!(Arc::ptr_eq(&first.many()[0], &second.many()[0]));
    assert_eq!(session.n1_count("customer", "orders"), 1);
}
