//! Filter composition for table-scoped remote reads and writes.

use serde_json::Value;

/// A single row predicate understood by every `RemoteStore`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive substring match of `term` against any of `columns`.
    OrIlike { columns: Vec<String>, term: String },
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.to_string(), value.into())
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Eq(c, _) | Self::Gte(c, _) | Self::Lte(c, _) | Self::In(c, _) => Some(c),
            Self::OrIlike { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Select query: filters, ordering, an inclusive row range and an optional
/// exact count of the filtered set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteQuery {
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub range: Option<(usize, usize)>,
    pub count: bool,
}

impl RemoteQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = Some(columns.to_string());
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column.to_string(), value.into()));
        self
    }

    pub fn in_list<V: Into<Value>>(mut self, column: &str, values: Vec<V>) -> Self {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn or_ilike(mut self, columns: &[&str], term: &str) -> Self {
        self.filters.push(Filter::OrIlike {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            term: term.to_string(),
        });
        self
    }

    pub fn order(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending,
        });
        self
    }

    /// Inclusive `from..=to` row window, applied after ordering.
    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some((from, to));
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }
}

/// Rows returned by a remote select, plus the exact filtered count when requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteRows {
    pub rows: Vec<Value>,
    pub count: Option<usize>,
}
