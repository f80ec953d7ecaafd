//! Ledger engine contract
//!
//! The script interpreter lives outside this crate. It plugs in through
//! [`EngineFactory`], which turns an acquired [`Store`] into a
//! [`LedgerEngine`], and reports failures through the [`ExecutionError`]
//! variants the script gateway knows how to classify.

mod resolver;

pub use resolver::Resolver;

use crate::context::Context;
use crate::storage::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub type Metadata = serde_json::Map<String, Value>;

/// Script submitted for execution. Passed to the engine untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptData {
    pub plain: String,
    #[serde(default)]
    pub vars: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub source: String,
    pub destination: String,
    pub amount: u64,
    pub asset: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volumes {
    pub input: i64,
    pub output: i64,
}

/// account -> asset -> volumes
pub type AccountsAssetsVolumes = BTreeMap<String, BTreeMap<String, Volumes>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandedTransaction {
    pub txid: u64,
    #[serde(default)]
    pub postings: Vec<Posting>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        rename = "preCommitVolumes",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub pre_commit_volumes: AccountsAssetsVolumes,
    #[serde(
        rename = "postCommitVolumes",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub post_commit_volumes: AccountsAssetsVolumes,
}

/// Every way script execution can fail, decided by the engine.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The script itself is at fault: compilation, validation or runtime.
    #[error("{code}: {message}")]
    Script { code: String, message: String },

    /// The transition collides with existing state.
    #[error("{message}")]
    Conflict { message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ExecutionError {
    pub fn script(code: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Script {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ExecutionError::Conflict {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait LedgerEngine: Send + Sync {
    /// Ledger this engine is bound to.
    fn name(&self) -> &str;

    /// Evaluates `script`. With `preview` set the engine must not persist
    /// anything and returns the transaction that would have been committed.
    async fn execute_script(
        &self,
        ctx: &Context,
        preview: bool,
        script: ScriptData,
    ) -> Result<ExpandedTransaction, ExecutionError>;

    /// Releases the engine and its store.
    async fn close(&self) -> crate::error::Result<()>;
}

pub trait EngineFactory: Send + Sync {
    fn build(&self, store: Store) -> Arc<dyn LedgerEngine>;
}

/// Engine used when no interpreter has been wired in. Ledgers can still be
/// created, listed and deleted; every script fails as an internal error.
pub struct UnconfiguredEngine {
    store: Store,
}

#[async_trait]
impl LedgerEngine for UnconfiguredEngine {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn execute_script(
        &self,
        _ctx: &Context,
        _preview: bool,
        _script: ScriptData,
    ) -> Result<ExpandedTransaction, ExecutionError> {
        Err(anyhow::anyhow!("no script engine configured for ledger {}", self.store.name()).into())
    }

    async fn close(&self) -> crate::error::Result<()> {
        self.store.close().await
    }
}

pub struct UnconfiguredEngineFactory;

impl EngineFactory for UnconfiguredEngineFactory {
    fn build(&self, store: Store) -> Arc<dyn LedgerEngine> {
        Arc::new(UnconfiguredEngine { store })
    }
}
