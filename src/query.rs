//! Query execution contract.
//!
//! The pipeline does not manage connections. Callers supply something that
//! can run a SQL statement against a named data source and hand back the
//! result as a `TypedRecord`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::record::TypedRecord;

/// Error raised by a query executor
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Data source unknown or unreachable
    Unavailable(String),
    ExecutionFailed(String),
    Timeout(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Unavailable(msg) => write!(f, "Data source unavailable: {}", msg),
            QueryError::ExecutionFailed(msg) => write!(f, "Query failed: {}", msg),
            QueryError::Timeout(msg) => write!(f, "Query timed out: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

/// Query executor trait.
///
/// Implementations run `sql` synchronously against `data_source` (or the
/// default source when `None`) and return the result set.
///
/// # Example
///
/// ```rust
/// use formguard::query::{QueryExecutor, QueryError};
/// use formguard::record::TypedRecord;
///
/// struct Empty;
///
/// impl QueryExecutor for Empty {
///     fn query(&self, _source: Option<&str>, _sql: &str) -> Result<TypedRecord, QueryError> {
///         Ok(TypedRecord::new())
///     }
/// }
/// ```
pub trait QueryExecutor {
    fn query(&self, data_source: Option<&str>, sql: &str) -> Result<TypedRecord, QueryError>;
}

/// Executor with canned results keyed by exact SQL text.
///
/// Every executed statement is logged so tests can assert on the generated
/// SQL. Statements without a canned result return an empty record.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    results: HashMap<String, TypedRecord>,
    failures: HashMap<String, QueryError>,
    executed: RefCell<Vec<String>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result returned for `sql`.
    pub fn with_result(mut self, sql: impl Into<String>, result: TypedRecord) -> Self {
        self.results.insert(sql.into(), result);
        self
    }

    /// Make `sql` fail with `error`.
    pub fn with_failure(mut self, sql: impl Into<String>, error: QueryError) -> Self {
        self.failures.insert(sql.into(), error);
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }
}

impl QueryExecutor for MemoryExecutor {
    fn query(&self, _data_source: Option<&str>, sql: &str) -> Result<TypedRecord, QueryError> {
        self.executed.borrow_mut().push(sql.to_string());
        if let Some(err) = self.failures.get(sql) {
            return Err(err.clone());
        }
        Ok(self.results.get(sql).cloned().unwrap_or_default())
    }
}

/// Executor for environments without a database.
///
/// Every query fails with `QueryError::Unavailable`, which rules surface as an
/// execution error rather than a validation failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineExecutor;

impl QueryExecutor for OfflineExecutor {
    fn query(&self, data_source: Option<&str>, _sql: &str) -> Result<TypedRecord, QueryError> {
        Err(QueryError::Unavailable(format!(
            "no database configured for data source '{}'",
            data_source.unwrap_or("default")
        )))
    }
}
