//! Error taxonomy shared by every engine component.
//!
//! # Invariants
//! - Errors carry structured context (model, field, step) so callers never
//!   need to parse messages.
//! - Nothing is retried or swallowed; every failure reaches the immediate
//!   caller.

use crate::db::DbError;
use crate::hooks::{HookFailure, HookPoint};
use crate::model::descriptor::FieldType;
use crate::tx::{CommitFailure, TxState};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type OrmResult<T> = Result<T, OrmError>;

/// Top-level engine error.
#[derive(Debug)]
pub enum OrmError {
    /// A model with the same name is already registered.
    DuplicateModel { model: String },
    /// No model with this name is registered.
    UnknownModel { model: String },
    /// Declaration, record or predicate failed validation.
    Validation(ValidationError),
    /// Storage rejected a write because of a unique constraint.
    UniqueConstraint { model: String, field: Option<String> },
    /// No live row with this key.
    NotFound { model: String, key: i64 },
    /// Migration stopped at `step_index`; earlier steps remain applied.
    Migration {
        step_index: usize,
        step: String,
        source: DbError,
    },
    /// A registered hook returned an error.
    Hook {
        model: String,
        point: HookPoint,
        source: HookFailure,
    },
    /// The transaction handle already reached a terminal state.
    TransactionClosed { state: TxState },
    /// Commit failed; the handle is left rolled back.
    Commit(CommitFailure),
    /// Rollback failed; the handle is left rolled back.
    Rollback(DbError),
    /// Transport-level storage failure.
    Db(DbError),
    /// Persisted row cannot be decoded into a record.
    InvalidData(String),
    /// Engine or session configuration is unusable.
    InvalidConfig(String),
}

impl Display for OrmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateModel { model } => write!(f, "model already registered: {model}"),
            Self::UnknownModel { model } => write!(f, "unknown model: {model}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::UniqueConstraint { model, field } => match field {
                Some(field) => write!(f, "unique constraint violated on {model}.{field}"),
                None => write!(f, "unique constraint violated on {model}"),
            },
            Self::NotFound { model, key } => write!(f, "{model} not found: {key}"),
            Self::Migration {
                step_index,
                step,
                source,
            } => write!(f, "migration step {step_index} ({step}) failed: {source}"),
            Self::Hook {
                model,
                point,
                source,
            } => write!(f, "{point} hook for {model} failed: {source}"),
            Self::TransactionClosed { state } => {
                write!(f, "transaction already closed (state: {state})")
            }
            Self::Commit(err) => write!(f, "commit failed: {err}"),
            Self::Rollback(err) => write!(f, "rollback failed: {err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::InvalidConfig(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for OrmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Migration { source, .. } => Some(source),
            Self::Hook { source, .. } => Some(source.as_ref()),
            Self::Commit(err) => Some(err),
            Self::Rollback(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::DuplicateModel { .. }
            | Self::UnknownModel { .. }
            | Self::UniqueConstraint { .. }
            | Self::NotFound { .. }
            | Self::TransactionClosed { .. }
            | Self::InvalidData(_)
            | Self::InvalidConfig(_) => None,
        }
    }
}

impl From<ValidationError> for OrmError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for OrmError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for OrmError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Validation failure with model and field context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub model: String,
    pub field: Option<String>,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(model: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            model: model.into(),
            field: None,
            kind,
        }
    }

    pub fn for_field(
        model: impl Into<String>,
        field: impl Into<String>,
        kind: ValidationErrorKind,
    ) -> Self {
        Self {
            model: model.into(),
            field: Some(field.into()),
            kind,
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{field}: {}", self.model, self.kind),
            None => write!(f, "{}: {}", self.model, self.kind),
        }
    }
}

impl Error for ValidationError {}

/// What exactly failed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    InvalidIdentifier(String),
    DuplicateField,
    ReservedField,
    MultiplePrimaryKeys,
    MissingPrimaryKey,
    InvalidPrimaryKey,
    InvalidDefault,
    InvalidForeignKey,
    DuplicateTable(String),
    DuplicateRelation,
    IncompleteRelation(&'static str),
    UnknownField,
    UnknownRelation,
    TypeMismatch {
        expected: FieldType,
        found: &'static str,
    },
    NullNotAllowed,
    MissingRequired,
    ImmutableField,
    AlreadyPersisted,
    NotPersisted,
    SoftDeleteUnsupported,
    ForeignKeyViolation,
    DuplicateHook(HookPoint),
    InvalidPredicate(&'static str),
}

impl Display for ValidationErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(value) => write!(f, "invalid identifier `{value}`"),
            Self::DuplicateField => write!(f, "field declared more than once"),
            Self::ReservedField => write!(f, "field name is reserved by the standard field set"),
            Self::MultiplePrimaryKeys => write!(f, "more than one primary key declared"),
            Self::MissingPrimaryKey => write!(f, "no primary key declared"),
            Self::InvalidPrimaryKey => {
                write!(f, "primary key must be a non-nullable integer")
            }
            Self::InvalidDefault => write!(f, "default value does not fit the field"),
            Self::InvalidForeignKey => {
                write!(f, "foreign key must be an integer referencing a model name")
            }
            Self::DuplicateTable(table) => write!(f, "table `{table}` is already mapped"),
            Self::DuplicateRelation => write!(f, "relation name already used"),
            Self::IncompleteRelation(detail) => write!(f, "incomplete relation: {detail}"),
            Self::UnknownField => write!(f, "unknown field"),
            Self::UnknownRelation => write!(f, "unknown relation"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {expected} value, found {found}")
            }
            Self::NullNotAllowed => write!(f, "null not allowed"),
            Self::MissingRequired => write!(f, "required field missing"),
            Self::ImmutableField => write!(f, "field is managed by the engine"),
            Self::AlreadyPersisted => write!(f, "record already has a primary key"),
            Self::NotPersisted => write!(f, "record has no primary key yet"),
            Self::SoftDeleteUnsupported => write!(f, "model has no soft-delete field"),
            Self::ForeignKeyViolation => write!(f, "foreign key references a missing row"),
            Self::DuplicateHook(point) => write!(f, "{point} hook already registered"),
            Self::InvalidPredicate(detail) => write!(f, "invalid predicate: {detail}"),
        }
    }
}
