//! The query execution collaborator.

use crate::error::Error;
use crate::row::Row;
use crate::select::Select;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Executes structured selects and returns raw rows.
///
/// Implementations own connections, pooling, retries and timeouts.
/// Failures are reported as [`Error::Query`], [`Error::Connection`] or
/// [`Error::Timeout`]; the loading engine propagates them unchanged.
/// Implementations should observe `cx` for cancellation.
pub trait QueryExecutor: Send + Sync {
    /// Run one select and return its rows in order.
    fn query(
        &self,
        cx: &Cx,
        select: &Select,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;
}

impl<E: QueryExecutor> QueryExecutor for std::sync::Arc<E> {
    fn query(
        &self,
        cx: &Cx,
        select: &Select,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        (**self).query(cx, select)
    }
}
