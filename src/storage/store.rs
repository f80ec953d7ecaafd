//! Store handle
//!
//! A [`Store`] is a live binding to one ledger's schema. It is what the
//! ledger engine is built on. The store owns a release callback that runs
//! exactly once: on [`Store::close`], or from `Drop` if the owner never
//! closed it.

use crate::backend::{Flavor, Schema, SqlValue};
use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::storage::query;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub type CloseFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type OnClose = Box<dyn FnOnce() -> CloseFuture + Send>;

const MIGRATIONS_TABLE: &str = "migrations";

pub struct Store {
    schema: Arc<dyn Schema>,
    on_close: Mutex<Option<OnClose>>,
}

impl Store {
    pub fn new(schema: Arc<dyn Schema>, on_close: OnClose) -> Self {
        Self {
            schema,
            on_close: Mutex::new(Some(on_close)),
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn flavor(&self) -> Flavor {
        self.schema.flavor()
    }

    /// The ledger's schema, for the engine to run its statements against.
    pub fn schema(&self) -> &Arc<dyn Schema> {
        &self.schema
    }

    /// Applies pending migrations. Returns whether any were applied.
    ///
    /// Each migration only uses `IF NOT EXISTS` DDL, so two callers racing
    /// on the same ledger both succeed.
    pub async fn initialize(&self, ctx: &Context) -> Result<bool> {
        let schema = self.schema.as_ref();
        let migrations_table = schema.table(MIGRATIONS_TABLE);

        schema
            .execute(
                ctx,
                &query::create_table(
                    &migrations_table,
                    "version varchar(255) primary key, date varchar(255)",
                ),
                &[],
            )
            .await?;

        let applied: HashSet<String> = schema
            .query(ctx, &query::select(&migrations_table, &["version"]).sql, &[])
            .await?
            .iter()
            .filter_map(|row| row.get_index(0).and_then(SqlValue::as_str).map(str::to_string))
            .collect();

        let mut applied_any = false;
        for migration in migrations(schema) {
            let version = migration.version.to_string();
            if applied.contains(&version) {
                continue;
            }

            for statement in &migration.statements {
                schema.execute(ctx, statement, &[]).await?;
            }

            let record = query::insert_ignore(
                schema.flavor(),
                &migrations_table,
                &["version", "date"],
                vec![SqlValue::from(version.clone()), SqlValue::from(Utc::now().to_rfc3339())],
            );
            schema.execute(ctx, &record.sql, &record.params).await?;

            debug!("Applied migration {} on {}", version, self.name());
            applied_any = true;
        }

        if applied_any {
            info!("Store {} migrated", self.name());
        }

        Ok(applied_any)
    }

    pub fn is_closed(&self) -> bool {
        self.on_close
            .lock()
            .map(|callback| callback.is_none())
            .unwrap_or(true)
    }

    /// Releases the underlying schema. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let callback = self
            .on_close
            .lock()
            .map_err(|_| StorageError::Internal(format!("store {} lock poisoned", self.name())))?
            .take();

        match callback {
            Some(callback) => {
                debug!("Closing store {}", self.name());
                callback().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let callback = match self.on_close.get_mut() {
            Ok(callback) => callback.take(),
            Err(_) => None,
        };

        let Some(callback) = callback else {
            return;
        };

        let name = self.schema.name().to_string();
        warn!("Store {} dropped without close, releasing in background", name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = callback().await {
                        warn!("Background release of store {} failed: {}", name, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to release store {}", name),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name())
            .field("flavor", &self.flavor())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Release callback that closes `schema` outside of any request context,
/// so a cancelled caller still gets its handle released.
pub fn close_schema(schema: Arc<dyn Schema>) -> OnClose {
    Box::new(move || -> CloseFuture {
        Box::pin(async move { schema.close(&Context::background()).await })
    })
}

struct Migration {
    version: u32,
    statements: Vec<String>,
}

fn migrations(schema: &dyn Schema) -> Vec<Migration> {
    let json = schema.flavor().json_type();

    vec![
        Migration {
            version: 0,
            statements: vec![
                query::create_table(
                    &schema.table("transactions"),
                    &format!(
                        "id bigint primary key, timestamp varchar(255), reference varchar(255) unique, hash varchar(256), metadata {}",
                        json
                    ),
                ),
                query::create_table(
                    &schema.table("postings"),
                    "txid bigint, posting_index integer, source varchar(255), destination varchar(255), amount bigint, asset varchar(255), primary key (txid, posting_index)",
                ),
            ],
        },
        Migration {
            version: 1,
            statements: vec![
                query::create_table(
                    &schema.table("accounts"),
                    &format!("address varchar(255) primary key, metadata {}", json),
                ),
                query::create_table(
                    &schema.table("volumes"),
                    "account varchar(255), asset varchar(255), input bigint, output bigint, primary key (account, asset)",
                ),
            ],
        },
        Migration {
            version: 2,
            statements: vec![query::create_table(
                &schema.table("log"),
                &format!(
                    "id bigint primary key, type varchar(255), hash varchar(256), date varchar(255), data {}",
                    json
                ),
            )],
        },
    ]
}
