//! Schema registry and DDL derivation.
//!
//! # Responsibility
//! - Hold validated model descriptors for the lifetime of the process.
//! - Turn descriptors into SQLite DDL statements.

pub mod ddl;
pub mod registry;
