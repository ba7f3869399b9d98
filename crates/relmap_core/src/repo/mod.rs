//! Record persistence and queries.
//!
//! # Responsibility
//! - Map records of registered models to rows and back.
//! - Expose structured predicates and lazy cursors over query results.
//!
//! # Invariants
//! - Every write validates the record against its descriptor first.
//! - Reads return semantic errors (`NotFound`) in addition to storage
//!   transport errors.

pub mod query;
pub mod record_mapper;
