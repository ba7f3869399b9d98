//! Relation resolution between registered models.

pub mod resolver;
