//! Model declarations and record instances.
//!
//! # Responsibility
//! - Define descriptors callers use to declare record types.
//! - Define the dynamic record and value shapes moved through the mapper.
//!
//! # Invariants
//! - Every persisted record is identified by an integer primary key.
//! - Deletion is a soft-delete marker unless hard deletion is requested.

pub mod descriptor;
pub mod record;
pub mod value;
