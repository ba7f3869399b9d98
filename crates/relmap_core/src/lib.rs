//! Embedded object-relational mapping engine over SQLite.
//!
//! Models are declared as descriptors, registered once, migrated additively
//! and then read and written as dynamic records through an explicit session
//! or transaction.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod model;
pub mod relation;
pub mod repo;
pub mod schema;
pub mod tx;

pub use config::{AfterHookPolicy, EngineConfig, SessionConfig};
pub use db::migrate::{MigrationEngine, MigrationPlan, MigrationStep};
pub use db::{open_session, open_session_in_memory, DbError, DbResult, Session};
pub use engine::Engine;
pub use error::{OrmError, OrmResult, ValidationError, ValidationErrorKind};
pub use hooks::{HookDispatcher, HookFailure, HookPoint};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::descriptor::{
    FieldSet, FieldSpec, FieldType, JoinTable, ModelBuilder, ModelDescriptor, RelationDecl,
    RelationKind,
};
pub use model::record::{FieldMap, Record, RelatedRecords};
pub use model::value::Value;
pub use relation::resolver::{Related, RelationResolver};
pub use repo::query::{Direction, FindQuery, Operator, Predicate, RecordCursor};
pub use repo::record_mapper::RecordMapper;
pub use schema::registry::SchemaRegistry;
pub use tx::{CommitFailure, Executor, Transaction, TxState};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
