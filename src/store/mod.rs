//! Persistence abstraction consumed by every other module.
//!
//! The framework never talks to a database driver directly; it goes through
//! [`Store`] and [`Connection`]. Two implementations ship in-tree:
//! [`PgStore`] over a pooled `tokio_postgres` client, and [`MemStore`], an
//! in-memory table map for tests and local runs.

mod memory;
mod pool;
mod postgres;

pub use memory::*;
pub use pool::*;
pub use postgres::*;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors surfaced by a store implementation. Propagated unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[error("no such table `{0}`")]
    MissingTable(String),
    #[error("unsupported column type `{0}`")]
    UnsupportedType(String),
    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// A dynamically typed cell. Reference-data tables are declared at runtime,
/// so rows cannot be concrete Rust structs.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
        }
    }
}

/// Total order so any value can serve as an iteration key.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

/// One row of a persisted collection, attribute name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: &str, value: Value) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn set(&mut self, attribute: &str, value: Value) {
        self.values.insert(attribute.to_string(), value);
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    /// The value under `attribute`, or `Null` when absent.
    pub fn key(&self, attribute: &str) -> Value {
        self.values.get(attribute).cloned().unwrap_or(Value::Null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One window of an ordered offset scan.
#[derive(Debug, Clone)]
pub struct Page<'a> {
    pub table: &'a str,
    pub order_by: &'a str,
    pub offset: usize,
    pub limit: usize,
    /// Suspend any ambient row scope so offsets index the full collection.
    pub unscoped: bool,
}

/// A column aggregate evaluated against current data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Max,
    Min,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub function: AggregateFn,
    pub column: String,
}

impl Aggregate {
    pub fn max(column: impl Into<String>) -> Self {
        Self { function: AggregateFn::Max, column: column.into() }
    }

    pub fn min(column: impl Into<String>) -> Self {
        Self { function: AggregateFn::Min, column: column.into() }
    }

    pub fn count(column: impl Into<String>) -> Self {
        Self { function: AggregateFn::Count, column: column.into() }
    }
}

/// A checked-out connection. Dropping the handle releases it back to its
/// store on every exit path; callers never check in explicitly.
#[async_trait::async_trait]
pub trait Connection: Send {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;
    async fn execute(&self, sql: &str) -> Result<(), StoreError>;
}

/// The persistence abstraction.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Scoped connection checkout.
    async fn checkout(&self) -> Result<Box<dyn Connection + '_>, StoreError>;

    /// Drop any cached column metadata held by the store.
    fn invalidate_structural_cache(&self);

    /// Ordered, offset-limited window over a table.
    async fn query_page(&self, page: &Page<'_>) -> Result<Vec<Record>, StoreError>;

    /// Keyset scan: rows with key strictly above `after`, ascending.
    async fn query_after(
        &self,
        table: &str,
        key: &str,
        after: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// Evaluate an aggregate over a column. `None` over zero rows, except
    /// `Count`, which yields zero.
    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
    ) -> Result<Option<Value>, StoreError>;

    /// Column layout of a table, served from the structural cache when warm.
    async fn columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Convenience: checkout, run one statement, release.
    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        let conn = self.checkout().await?;
        conn.execute(sql).await
    }
}

#[async_trait::async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn checkout(&self) -> Result<Box<dyn Connection + '_>, StoreError> {
        self.as_ref().checkout().await
    }

    fn invalidate_structural_cache(&self) {
        self.as_ref().invalidate_structural_cache()
    }

    async fn query_page(&self, page: &Page<'_>) -> Result<Vec<Record>, StoreError> {
        self.as_ref().query_page(page).await
    }

    async fn query_after(
        &self,
        table: &str,
        key: &str,
        after: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        self.as_ref().query_after(table, key, after, limit).await
    }

    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
    ) -> Result<Option<Value>, StoreError> {
        self.as_ref().aggregate(table, aggregate).await
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.as_ref().columns(table).await
    }

    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        self.as_ref().execute(sql).await
    }
}
