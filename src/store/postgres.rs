use super::Aggregate;
use super::AggregateFn;
use super::Connection;
use super::Page;
use super::Pool;
use super::Pooled;
use super::Record;
use super::Store;
use super::StoreError;
use super::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::Type;

/// [`Store`] backed by a pooled `tokio_postgres` client.
///
/// Column metadata from `information_schema` is cached in-process and
/// dropped by [`Store::invalidate_structural_cache`].
pub struct PgStore {
    pool: Pool,
    cache: Mutex<BTreeMap<String, Vec<String>>>,
}

impl PgStore {
    /// Connect a pool of `size` clients to the database at `url`.
    pub async fn connect(url: &str, size: usize) -> Result<Self, StoreError> {
        Ok(Self {
            pool: Pool::connect(url, size).await?,
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    fn record(row: &Row) -> Result<Record, StoreError> {
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            record.set(column.name(), Self::value(row, idx)?);
        }
        Ok(record)
    }

    fn value(row: &Row, idx: usize) -> Result<Value, StoreError> {
        let ty = row.columns()[idx].type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map(|n| Value::Integer(n as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map(|n| Value::Integer(n as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?
                .map(|x| Value::Float(x as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(Value::Float)
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR {
            row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
        } else {
            return Err(StoreError::UnsupportedType(ty.to_string()));
        };
        Ok(value.unwrap_or(Value::Null))
    }
}

#[async_trait::async_trait]
impl Connection for Pooled {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        const SQL: &str = "SELECT 1 FROM information_schema.tables WHERE table_name = $1";
        Ok(self.query_opt(SQL, &[&table]).await?.is_some())
    }

    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        Ok(self.batch_execute(sql).await?)
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn checkout(&self) -> Result<Box<dyn Connection + '_>, StoreError> {
        Ok(Box::new(self.pool.checkout().await))
    }

    fn invalidate_structural_cache(&self) {
        self.cache.lock().expect("cache mutex").clear();
    }

    // The unscoped flag is moot here: this impl applies no ambient scope.
    async fn query_page(&self, page: &Page<'_>) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT * FROM {t} ORDER BY {k} ASC LIMIT {l} OFFSET {o}",
            t = page.table,
            k = page.order_by,
            l = page.limit,
            o = page.offset,
        );
        let conn = self.pool.checkout().await;
        conn.query(&sql, &[]).await?.iter().map(Self::record).collect()
    }

    async fn query_after(
        &self,
        table: &str,
        key: &str,
        after: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let conn = self.pool.checkout().await;
        let rows = match after {
            None => {
                let sql = format!(
                    "SELECT * FROM {t} ORDER BY {k} ASC LIMIT {l}",
                    t = table,
                    k = key,
                    l = limit,
                );
                conn.query(&sql, &[]).await?
            }
            Some(value) => {
                let sql = format!(
                    "SELECT * FROM {t} WHERE {k} > $1 ORDER BY {k} ASC LIMIT {l}",
                    t = table,
                    k = key,
                    l = limit,
                );
                match value {
                    Value::Integer(n) => conn.query(&sql, &[n]).await?,
                    Value::Text(s) => conn.query(&sql, &[s]).await?,
                    other => {
                        return Err(StoreError::Rejected(format!(
                            "unsupported key value {other:?}"
                        )));
                    }
                }
            }
        };
        rows.iter().map(Self::record).collect()
    }

    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
    ) -> Result<Option<Value>, StoreError> {
        let function = match aggregate.function {
            AggregateFn::Max => "MAX",
            AggregateFn::Min => "MIN",
            AggregateFn::Count => "COUNT",
        };
        let sql = format!(
            "SELECT {f}({c}) FROM {t}",
            f = function,
            c = aggregate.column,
            t = table,
        );
        let conn = self.pool.checkout().await;
        let row = conn.query_one(&sql, &[]).await?;
        match Self::value(&row, 0)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        if let Some(columns) = self.cache.lock().expect("cache mutex").get(table) {
            return Ok(columns.clone());
        }
        const SQL: &str = "SELECT column_name FROM information_schema.columns \
                           WHERE table_name = $1 ORDER BY ordinal_position";
        let conn = self.pool.checkout().await;
        let columns: Vec<String> = conn
            .query(SQL, &[&table])
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect();
        if columns.is_empty() {
            return Err(StoreError::MissingTable(table.to_string()));
        }
        self.cache
            .lock()
            .expect("cache mutex")
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }
}
