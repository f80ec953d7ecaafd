//! Ledger catalog and store acquisition.
//!
//! The driver keeps one reserved schema, `_system`, holding the `ledgers`
//! catalog table. Every other schema belongs to a ledger. Creating a ledger
//! is two independent idempotent steps (catalog row, then schema) with no
//! transaction spanning them; a caller that fails half way simply retries
//! and converges.

use crate::backend::{Backend, Schema, SqlValue};
use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::storage::query;
use crate::storage::store::{close_schema, Store};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub const SYSTEM_SCHEMA: &str = "_system";

const LEDGERS_TABLE: &str = "ledgers";
const MAX_LEDGER_NAME_LEN: usize = 63;

pub struct Driver {
    name: String,
    backend: Arc<dyn Backend>,
    system_schema: RwLock<Option<Arc<dyn Schema>>>,
}

impl Driver {
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
            system_schema: RwLock::new(None),
        }
    }

    /// Name of the SQL driver this instance was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens the backend, binds `_system` and creates the catalog table.
    pub async fn initialize(&self, ctx: &Context) -> Result<()> {
        if self.system().is_ok() {
            return Ok(());
        }

        self.backend.initialize(ctx).await?;

        let system = self.backend.schema(ctx, SYSTEM_SCHEMA).await?;
        if let Err(e) = self.bootstrap_catalog(ctx, system.as_ref()).await {
            release(system.as_ref()).await;
            return Err(e);
        }

        let mut slot = self
            .system_schema
            .write()
            .map_err(|_| StorageError::Internal("system schema lock poisoned".to_string()))?;
        *slot = Some(system);

        info!("Ledger catalog ready (driver={})", self.name);
        Ok(())
    }

    async fn bootstrap_catalog(&self, ctx: &Context, system: &dyn Schema) -> Result<()> {
        system.initialize(ctx).await?;

        let sql = query::create_table(
            &system.table(LEDGERS_TABLE),
            "ledger varchar(255) primary key, addedAt timestamp",
        );
        system.execute(ctx, &sql, &[]).await?;
        Ok(())
    }

    fn system(&self) -> Result<Arc<dyn Schema>> {
        self.system_schema
            .read()
            .map_err(|_| StorageError::Internal("system schema lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| StorageError::Internal("driver not initialized".to_string()))
    }

    /// Records `ledger` in the catalog. Returns `true` only for the call
    /// that actually inserted the row.
    pub async fn register(&self, ctx: &Context, ledger: &str) -> Result<bool> {
        check_reserved(ledger)?;

        let system = self.system()?;
        let stmt = query::insert_ignore(
            system.flavor(),
            &system.table(LEDGERS_TABLE),
            &["ledger", "addedAt"],
            vec![SqlValue::from(ledger), SqlValue::from(Utc::now())],
        );

        let affected = system.execute(ctx, &stmt.sql, &stmt.params).await?;
        if affected > 0 {
            debug!("Registered ledger {}", ledger);
        }
        Ok(affected > 0)
    }

    /// Whether `ledger` has a catalog row. Absence is `Ok(false)`; a failing
    /// backend is an error, never a silent `false`.
    pub async fn exists(&self, ctx: &Context, ledger: &str) -> Result<bool> {
        let system = self.system()?;
        let stmt = query::select_where_eq(
            system.flavor(),
            &system.table(LEDGERS_TABLE),
            &["ledger"],
            "ledger",
            SqlValue::from(ledger),
        );

        let rows = system.query(ctx, &stmt.sql, &stmt.params).await?;
        Ok(!rows.is_empty())
    }

    pub async fn list(&self, ctx: &Context) -> Result<Vec<String>> {
        let system = self.system()?;
        let stmt = query::select(&system.table(LEDGERS_TABLE), &["ledger"]);

        let rows = system.query(ctx, &stmt.sql, &stmt.params).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_index(0).and_then(SqlValue::as_str).map(str::to_string))
            .collect())
    }

    /// Returns a store bound to `ledger`, plus whether this call created the
    /// catalog entry.
    ///
    /// With `create == false` an unknown ledger fails with `NotFound` and
    /// nothing is written. On failure the schema handle is released before
    /// returning.
    pub async fn get_store(&self, ctx: &Context, ledger: &str, create: bool) -> Result<(Store, bool)> {
        check_reserved(ledger)?;
        validate_ledger_name(ledger)?;

        let exists = self.exists(ctx, ledger).await?;
        if !exists && !create {
            return Err(StorageError::NotFound {
                ledger: ledger.to_string(),
            });
        }

        let schema = self.backend.schema(ctx, ledger).await?;

        let created = match self.prepare_partition(ctx, ledger, schema.as_ref()).await {
            Ok(created) => created,
            Err(e) => {
                release(schema.as_ref()).await;
                return Err(e);
            }
        };

        let store = Store::new(schema.clone(), close_schema(schema));
        if let Err(e) = store.initialize(ctx).await {
            if let Err(close_err) = store.close().await {
                warn!("Failed to release store {}: {}", ledger, close_err);
            }
            return Err(e);
        }

        if created {
            info!("Created ledger {}", ledger);
        }
        Ok((store, created))
    }

    async fn prepare_partition(&self, ctx: &Context, ledger: &str, schema: &dyn Schema) -> Result<bool> {
        let created = self.register(ctx, ledger).await?;
        schema.initialize(ctx).await?;
        Ok(created)
    }

    /// Drops the ledger's schema, then its catalog row. When dropping the
    /// schema fails the catalog row is kept so the ledger stays visible.
    pub async fn delete_store(&self, ctx: &Context, ledger: &str) -> Result<()> {
        check_reserved(ledger)?;
        validate_ledger_name(ledger)?;

        let system = self.system()?;
        let schema = self.backend.schema(ctx, ledger).await?;

        let deleted = schema.delete(ctx).await;
        release(schema.as_ref()).await;
        deleted?;

        let stmt = query::delete_where_eq(
            system.flavor(),
            &system.table(LEDGERS_TABLE),
            "ledger",
            SqlValue::from(ledger),
        );
        system.execute(ctx, &stmt.sql, &stmt.params).await?;

        info!("Deleted ledger {}", ledger);
        Ok(())
    }

    /// Releases `_system`, then the backend. Closing twice is a no-op.
    pub async fn close(&self, ctx: &Context) -> Result<()> {
        let system = self
            .system_schema
            .write()
            .map_err(|_| StorageError::Internal("system schema lock poisoned".to_string()))?
            .take();

        if let Some(system) = system {
            system.close(ctx).await?;
            self.backend.close(ctx).await?;
            info!("Driver {} closed", self.name);
        }
        Ok(())
    }
}

async fn release(schema: &dyn Schema) {
    if let Err(e) = schema.close(&Context::background()).await {
        warn!("Failed to release schema {}: {}", schema.name(), e);
    }
}

fn check_reserved(ledger: &str) -> Result<()> {
    if ledger == SYSTEM_SCHEMA {
        return Err(StorageError::ReservedName {
            name: ledger.to_string(),
        });
    }
    Ok(())
}

/// Ledger names become schema identifiers (or file names), so keep them to
/// a conservative character set.
pub fn validate_ledger_name(ledger: &str) -> Result<()> {
    let reason = if ledger.is_empty() {
        Some("must not be empty")
    } else if ledger.len() > MAX_LEDGER_NAME_LEN {
        Some("must be at most 63 characters")
    } else if !ledger
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Some("may only contain letters, digits, '_' and '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidName {
            name: ledger.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
