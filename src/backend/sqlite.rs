use super::{quote_identifier, Backend, Flavor, Row, Schema, SqlValue};
use crate::context::Context;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// SQLite backend: every schema is a separate database file in `dir`.
pub struct SqliteBackend {
    dir: PathBuf,
}

impl SqliteBackend {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn schema_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.db", name))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn flavor(&self) -> Flavor {
        Flavor::Sqlite
    }

    async fn initialize(&self, ctx: &Context) -> Result<()> {
        ctx.run(async {
            tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
                StorageError::connection(
                    &self.dir.display().to_string(),
                    format!("Failed to create data directory: {}", e),
                )
            })?;
            info!("Using SQLite data directory {}", self.dir.display());
            Ok(())
        })
        .await
    }

    async fn schema(&self, ctx: &Context, name: &str) -> Result<Arc<dyn Schema>> {
        ctx.check()?;
        Ok(Arc::new(SqliteSchema::new(name, self.schema_path(name))))
    }

    async fn close(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

pub struct SqliteSchema {
    name: String,
    path: PathBuf,
    state: Arc<Mutex<ConnState>>,
}

/// Once `closed` is set the handle never opens the file again.
#[derive(Default)]
struct ConnState {
    conn: Option<Connection>,
    closed: bool,
}

impl SqliteSchema {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
            state: Arc::new(Mutex::new(ConnState::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on a blocking thread against this schema's connection,
    /// opening (and so creating) the database file on first use. A closed
    /// handle fails with `Closed` instead.
    async fn with_connection<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let state = self.state.clone();
        let path = self.path.clone();
        let name = self.name.clone();

        ctx.run(async move {
            tokio::task::spawn_blocking(move || {
                let mut guard = state.lock().map_err(|_| {
                    StorageError::Internal(format!("connection lock poisoned for {}", name))
                })?;
                if guard.closed {
                    return Err(StorageError::Closed { schema: name });
                }
                if guard.conn.is_none() {
                    guard.conn = Some(open_connection(&name, &path)?);
                }
                match guard.conn.as_ref() {
                    Some(conn) => f(conn),
                    None => Err(StorageError::connection(&name, "connection unavailable")),
                }
            })
            .await?
        })
        .await
    }

    /// Drops the connection and marks the handle closed.
    fn release(&self) -> Result<()> {
        let mut guard = self.state.lock().map_err(|_| {
            StorageError::Internal(format!("connection lock poisoned for {}", self.name))
        })?;
        guard.closed = true;
        guard.conn.take();
        Ok(())
    }
}

#[async_trait]
impl Schema for SqliteSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> Flavor {
        Flavor::Sqlite
    }

    fn table(&self, table: &str) -> String {
        quote_identifier(table)
    }

    async fn initialize(&self, ctx: &Context) -> Result<()> {
        self.with_connection(ctx, |_| Ok(())).await?;
        debug!("Schema {} ready at {}", self.name, self.path.display());
        Ok(())
    }

    async fn delete(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        self.release()?;

        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::query(
                        &self.name,
                        format!("Failed to remove {:?}: {}", file, e),
                    ))
                }
            }
        }

        info!("Deleted schema {}", self.name);
        Ok(())
    }

    async fn close(&self, _ctx: &Context) -> Result<()> {
        self.release()?;
        debug!("Closed schema {}", self.name);
        Ok(())
    }

    async fn execute(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let sql = sql.to_string();
        let values: Vec<Value> = params.iter().map(to_sqlite_value).collect();
        let name = self.name.clone();

        debug!("Executing on {}: {}", self.name, sql);
        self.with_connection(ctx, move |conn| {
            conn.execute(&sql, params_from_iter(values.iter()))
                .map(|affected| affected as u64)
                .map_err(|e| StorageError::query(&name, e))
        })
        .await
    }

    async fn query(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let values: Vec<Value> = params.iter().map(to_sqlite_value).collect();
        let name = self.name.clone();

        debug!("Querying {}: {}", self.name, sql);
        self.with_connection(ctx, move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StorageError::query(&name, e))?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

            let mut rows = stmt
                .query(params_from_iter(values.iter()))
                .map_err(|e| StorageError::query(&name, e))?;

            let mut result = Vec::new();
            while let Some(row) = rows.next().map_err(|e| StorageError::query(&name, e))? {
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    let value = row.get_ref(idx).map_err(|e| StorageError::query(&name, e))?;
                    values.push(from_sqlite_value(value));
                }
                result.push(Row::new(columns.clone(), values));
            }

            Ok(result)
        })
        .await
    }
}

fn open_connection(name: &str, path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(|e| StorageError::connection(name, e))?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(|e| StorageError::connection(name, e))?;
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
        .map_err(|e| StorageError::connection(name, e))?;

    Ok(conn)
}

fn to_sqlite_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Integer(i64::from(*b)),
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Timestamp(ts) => Value::Text(ts.to_rfc3339()),
        SqlValue::Json(v) => Value::Text(v.to_string()),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_schema_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::new(temp_dir.path());
        let ctx = Context::background();

        backend.initialize(&ctx).await.unwrap();
        let schema = backend.schema(&ctx, "quickstart").await.unwrap();
        let path = temp_dir.path().join("quickstart.db");

        // Binding a handle creates nothing.
        assert!(!path.exists());

        schema.initialize(&ctx).await.unwrap();
        assert!(path.exists());

        schema.delete(&ctx).await.unwrap();
        assert!(!path.exists());

        // Deleting twice is fine.
        schema.delete(&ctx).await.unwrap();
        schema.close(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let temp_dir = TempDir::new().unwrap();
        let schema = SqliteSchema::new("ledger", temp_dir.path().join("ledger.db"));
        let ctx = Context::background();

        schema
            .execute(
                &ctx,
                "CREATE TABLE IF NOT EXISTS accounts (address varchar(255) primary key, balance bigint)",
                &[],
            )
            .await
            .unwrap();

        let inserted = schema
            .execute(
                &ctx,
                "INSERT INTO accounts (address, balance) VALUES (?1, ?2)",
                &[SqlValue::from("world"), SqlValue::from(-100i64)],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = schema
            .query(&ctx, "SELECT address, balance FROM accounts", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("address").and_then(SqlValue::as_str), Some("world"));
        assert_eq!(rows[0].get("balance").and_then(SqlValue::as_i64), Some(-100));
    }

    #[tokio::test]
    async fn test_query_error_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let schema = SqliteSchema::new("ledger", temp_dir.path().join("ledger.db"));
        let ctx = Context::background();

        let result = schema.query(&ctx, "SELECT * FROM missing_table", &[]).await;
        assert!(matches!(result, Err(StorageError::QueryFailed { .. })));
    }

    #[tokio::test]
    async fn test_closed_schema_never_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.db");
        let schema = SqliteSchema::new("ledger", path.clone());
        let ctx = Context::background();

        schema.initialize(&ctx).await.unwrap();
        schema.close(&ctx).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let result = schema.query(&ctx, "SELECT 1", &[]).await;
        assert!(matches!(result, Err(StorageError::Closed { .. })));
        let result = schema.execute(&ctx, "CREATE TABLE t (id integer)", &[]).await;
        assert!(matches!(result, Err(StorageError::Closed { .. })));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_work() {
        let temp_dir = TempDir::new().unwrap();
        let schema = SqliteSchema::new("ledger", temp_dir.path().join("ledger.db"));
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        let result = schema.initialize(&ctx).await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(!schema.path().exists());
    }
}
