use super::Aggregate;
use super::AggregateFn;
use super::Connection;
use super::Page;
use super::Record;
use super::Store;
use super::StoreError;
use super::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

/// In-memory [`Store`] for tests and local runs.
///
/// Interprets just enough DDL to model rebuilds — `DROP TABLE IF EXISTS`
/// and `CREATE TABLE` with a parenthesized column list. Every executed
/// statement is recorded verbatim in a log for assertions. An optional
/// ambient row scope narrows scoped queries, and a reject marker turns
/// matching statements into errors to exercise failure paths.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    tables: Mutex<BTreeMap<String, Table>>,
    log: Mutex<Vec<String>>,
    scope: Mutex<Option<Scope>>,
    reject: Mutex<Option<String>>,
    cache: Mutex<BTreeMap<String, Vec<String>>>,
    outstanding: AtomicUsize,
}

#[derive(Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

/// Ambient row scope: scoped queries see only rows whose `column` equals
/// `equals`. Unscoped queries ignore it.
#[derive(Debug, Clone)]
pub struct Scope {
    pub column: String,
    pub equals: Value,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table directly, bypassing the DDL path and the log.
    pub fn create(&self, table: &str, columns: &[&str]) {
        self.state.tables.lock().expect("tables mutex").insert(
            table.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn insert(&self, table: &str, record: Record) -> Result<(), StoreError> {
        self.state
            .tables
            .lock()
            .expect("tables mutex")
            .get_mut(table)
            .ok_or_else(|| StoreError::MissingTable(table.to_string()))?
            .rows
            .push(record);
        Ok(())
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.log.lock().expect("log mutex").clone()
    }

    pub fn scope(&self, scope: Scope) {
        *self.state.scope.lock().expect("scope mutex") = Some(scope);
    }

    pub fn unscope(&self) {
        *self.state.scope.lock().expect("scope mutex") = None;
    }

    /// Fail any executed statement containing `marker`.
    pub fn reject_matching(&self, marker: &str) {
        *self.state.reject.lock().expect("reject mutex") = Some(marker.to_string());
    }

    /// Connections currently checked out.
    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::SeqCst)
    }

    /// Whether the structural cache holds an entry for `table`.
    pub fn cached(&self, table: &str) -> bool {
        self.state
            .cache
            .lock()
            .expect("cache mutex")
            .contains_key(table)
    }

    pub fn columns_of(&self, table: &str) -> Option<Vec<String>> {
        self.state
            .tables
            .lock()
            .expect("tables mutex")
            .get(table)
            .map(|t| t.columns.clone())
    }

    fn rows(&self, table: &str, scoped: bool) -> Result<Vec<Record>, StoreError> {
        let tables = self.state.tables.lock().expect("tables mutex");
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::MissingTable(table.to_string()))?
            .rows
            .clone();
        let scope = self.state.scope.lock().expect("scope mutex").clone();
        match scope {
            Some(scope) if scoped => Ok(rows
                .into_iter()
                .filter(|row| row.key(&scope.column) == scope.equals)
                .collect()),
            _ => Ok(rows),
        }
    }
}

struct MemConn {
    state: Arc<State>,
}

impl MemConn {
    fn checkout(state: &Arc<State>) -> Self {
        state.outstanding.fetch_add(1, Ordering::SeqCst);
        Self { state: Arc::clone(state) }
    }
}

impl Drop for MemConn {
    fn drop(&mut self) {
        self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Connection for MemConn {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .tables
            .lock()
            .expect("tables mutex")
            .contains_key(table))
    }

    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        let rejected = self
            .state
            .reject
            .lock()
            .expect("reject mutex")
            .as_ref()
            .is_some_and(|marker| sql.contains(marker.as_str()));
        if rejected {
            return Err(StoreError::Rejected(sql.to_string()));
        }
        self.state.log.lock().expect("log mutex").push(sql.to_string());
        let trimmed = sql.trim().trim_end_matches(';').trim();
        let upper = trimmed.to_uppercase();
        if upper.starts_with("DROP TABLE IF EXISTS") {
            let name = unquote(trimmed["DROP TABLE IF EXISTS".len()..].trim());
            self.state.tables.lock().expect("tables mutex").remove(&name);
        } else if upper.starts_with("CREATE TABLE") {
            let mut rest = trimmed["CREATE TABLE".len()..].trim();
            if rest.to_uppercase().starts_with("IF NOT EXISTS") {
                rest = rest["IF NOT EXISTS".len()..].trim();
            }
            if let (Some(open), Some(close)) = (rest.find('('), rest.rfind(')')) {
                let name = unquote(rest[..open].trim());
                let columns = column_names(&rest[open + 1..close]);
                self.state
                    .tables
                    .lock()
                    .expect("tables mutex")
                    .insert(name, Table { columns, rows: Vec::new() });
            }
        }
        Ok(())
    }
}

fn unquote(name: &str) -> String {
    name.trim_matches('"').to_string()
}

/// First token of each top-level comma-separated fragment, skipping table
/// constraints.
fn column_names(body: &str) -> Vec<String> {
    const CONSTRAINTS: [&str; 5] = ["PRIMARY", "UNIQUE", "CONSTRAINT", "FOREIGN", "CHECK"];
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut fragment = String::new();
    for c in body.chars().chain(std::iter::once(',')) {
        match c {
            '(' => {
                depth += 1;
                fragment.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                fragment.push(c);
            }
            ',' if depth == 0 => {
                if let Some(first) = fragment.split_whitespace().next() {
                    if !CONSTRAINTS.contains(&first.to_uppercase().as_str()) {
                        names.push(unquote(first));
                    }
                }
                fragment.clear();
            }
            _ => fragment.push(c),
        }
    }
    names
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn checkout(&self) -> Result<Box<dyn Connection + '_>, StoreError> {
        Ok(Box::new(MemConn::checkout(&self.state)))
    }

    fn invalidate_structural_cache(&self) {
        self.state.cache.lock().expect("cache mutex").clear();
    }

    async fn query_page(&self, page: &Page<'_>) -> Result<Vec<Record>, StoreError> {
        let mut rows = self.rows(page.table, !page.unscoped)?;
        rows.sort_by_key(|row| row.key(page.order_by));
        Ok(rows
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    // Keyset scans serve the iterator's full-collection guarantee, so the
    // ambient scope never applies here.
    async fn query_after(
        &self,
        table: &str,
        key: &str,
        after: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let mut rows = self.rows(table, false)?;
        rows.sort_by_key(|row| row.key(key));
        Ok(rows
            .into_iter()
            .filter(|row| after.is_none_or(|a| row.key(key) > *a))
            .take(limit)
            .collect())
    }

    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
    ) -> Result<Option<Value>, StoreError> {
        let rows = self.rows(table, false)?;
        let values: Vec<Value> = rows
            .iter()
            .map(|row| row.key(&aggregate.column))
            .filter(|value| *value != Value::Null)
            .collect();
        Ok(match aggregate.function {
            AggregateFn::Count => Some(Value::Integer(values.len() as i64)),
            AggregateFn::Max => values.into_iter().max(),
            AggregateFn::Min => values.into_iter().min(),
        })
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        if let Some(columns) = self.state.cache.lock().expect("cache mutex").get(table) {
            return Ok(columns.clone());
        }
        let columns = self
            .columns_of(table)
            .ok_or_else(|| StoreError::MissingTable(table.to_string()))?;
        self.state
            .cache
            .lock()
            .expect("cache mutex")
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }
}
