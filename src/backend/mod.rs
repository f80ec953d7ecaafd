//! Backend contracts
//!
//! A [`Backend`] is one physical database; it hands out [`Schema`] handles,
//! each an isolated namespace owning its own tables. Two implementations
//! exist: PostgreSQL, where a schema is a `CREATE SCHEMA` namespace inside a
//! single database, and SQLite, where a schema is its own database file.
//!
//! Which implementation serves a flavor is decided by the driver name
//! registered for it in [`DriverNames`].

mod postgres;
mod sqlite;

pub use postgres::{PostgresBackend, PostgresSchema};
pub use sqlite::{SqliteBackend, SqliteSchema};

use crate::context::Context;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Sqlite,
    PostgreSql,
}

impl Flavor {
    /// Positional parameter marker for the 1-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Flavor::Sqlite => format!("?{}", index),
            Flavor::PostgreSql => format!("${}", index),
        }
    }

    /// Column type used for JSON documents.
    pub fn json_type(&self) -> &'static str {
        match self {
            Flavor::Sqlite => "text",
            Flavor::PostgreSql => "jsonb",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Sqlite => write!(f, "sqlite"),
            Flavor::PostgreSql => write!(f, "postgres"),
        }
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Flavor::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Flavor::PostgreSql),
            other => Err(format!("unknown storage flavor: {}", other)),
        }
    }
}

/// Flavor to low-level driver name mapping.
///
/// Built once while loading configuration and handed by reference to
/// [`open`]; nothing reads it after the backend is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverNames {
    names: HashMap<Flavor, String>,
}

impl DriverNames {
    pub fn empty() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub fn set(&mut self, flavor: Flavor, name: impl Into<String>) {
        self.names.insert(flavor, name.into());
    }

    pub fn get(&self, flavor: Flavor) -> Option<&str> {
        self.names.get(&flavor).map(String::as_str)
    }
}

impl Default for DriverNames {
    fn default() -> Self {
        let mut names = Self::empty();
        names.set(Flavor::Sqlite, "sqlite3");
        names.set(Flavor::PostgreSql, "pgx");
        names
    }
}

/// Value bound to, or read back from, a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        SqlValue::Json(value)
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn flavor(&self) -> Flavor;

    /// Verifies the backend is reachable and ready to hand out schemas.
    async fn initialize(&self, ctx: &Context) -> Result<()>;

    /// Binds a handle to `name`. Nothing is created until
    /// [`Schema::initialize`] is called on the handle.
    async fn schema(&self, ctx: &Context, name: &str) -> Result<Arc<dyn Schema>>;

    async fn close(&self, ctx: &Context) -> Result<()>;
}

#[async_trait]
pub trait Schema: Send + Sync {
    fn name(&self) -> &str;

    fn flavor(&self) -> Flavor;

    /// Fully qualified, quoted name of `table` inside this schema.
    fn table(&self, table: &str) -> String;

    /// Creates the namespace if missing.
    async fn initialize(&self, ctx: &Context) -> Result<()>;

    /// Drops the namespace and everything in it. Deleting a missing
    /// namespace succeeds.
    async fn delete(&self, ctx: &Context) -> Result<()>;

    async fn close(&self, ctx: &Context) -> Result<()>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<u64>;

    async fn query(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
}

#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub database_url: String,
    pub sqlite_dir: PathBuf,
    pub max_connections: u32,
}

/// Opens the backend registered for `flavor`.
pub fn open(
    flavor: Flavor,
    drivers: &DriverNames,
    options: &BackendOptions,
) -> Result<Arc<dyn Backend>> {
    let driver = drivers.get(flavor);

    match (flavor, driver) {
        (Flavor::PostgreSql, Some("pgx" | "postgres")) => Ok(Arc::new(PostgresBackend::new(
            &options.database_url,
            options.max_connections,
        )?)),
        (Flavor::Sqlite, Some("sqlite3" | "sqlite")) => {
            Ok(Arc::new(SqliteBackend::new(&options.sqlite_dir)))
        }
        _ => Err(StorageError::UnknownDriver {
            flavor,
            driver: driver.map(str::to_string),
        }),
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
