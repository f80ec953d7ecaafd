//! Ledger Gateway Library
//!
//! Multi-tenant ledger storage: a catalog of ledgers kept in a reserved
//! `_system` schema, one isolated schema per ledger, and a script
//! execution gateway that normalizes engine outcomes into stable API
//! responses.

pub mod api;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod storage;
