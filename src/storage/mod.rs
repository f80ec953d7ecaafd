//! Ledger storage
//!
//! [`Driver`] owns the catalog of known ledgers and hands out [`Store`]s
//! bound to each ledger's schema.

mod driver;
pub mod query;
mod store;

pub use driver::{validate_ledger_name, Driver, SYSTEM_SCHEMA};
pub use store::{close_schema, CloseFuture, OnClose, Store};
