//! Raw rows returned by the execution collaborator.

use crate::value::Value;

/// One result row: column names paired positionally with values.
///
/// Lookups scan the columns; relationship selects carry a handful of
/// columns, so there is no per-row index.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Pair `columns` with `values`. Extra values without a column name
    /// are unreachable by name.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value of `column`, if the row carries it.
    pub fn get_by_name(&self, column: &str) -> Option<&Value> {
        let at = self.columns.iter().position(|c| c == column)?;
        self.values.get(at)
    }

    /// `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(&self.values)
    }
}
