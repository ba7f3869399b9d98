//! Record persistence: create, read, update and delete for registered models.
//!
//! # Responsibility
//! - Translate record operations into parameterized SQL for one model.
//! - Drive lifecycle hooks around every write.
//!
//! # Invariants
//! - Soft-deleted rows are invisible to reads unless explicitly requested.
//! - Standard fields are stamped by the mapper and never written by callers.
//! - The mapper holds no record after an operation returns.

use crate::config::{AfterHookPolicy, EngineConfig};
use crate::error::{OrmError, OrmResult, ValidationError, ValidationErrorKind};
use crate::hooks::{HookDispatcher, HookPoint};
use crate::model::descriptor::{
    ModelDescriptor, CREATED_AT_FIELD, DELETED_AT_FIELD, UPDATED_AT_FIELD,
};
use crate::model::record::{FieldMap, Record};
use crate::model::value::Value;
use crate::repo::query::{
    check_fits, column_list, known_field, parse_row, where_clause, FindQuery, Predicate,
    RecordCursor,
};
use crate::schema::ddl::quote;
use crate::schema::registry::SchemaRegistry;
use crate::tx::Executor;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{ffi, params_from_iter};
use std::time::{SystemTime, UNIX_EPOCH};

static CONSTRAINT_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:UNIQUE|NOT NULL) constraint failed: [A-Za-z0-9_]+\.([A-Za-z0-9_]+)")
        .expect("valid constraint regex")
});

/// Mapper for record operations. Cheap to construct; borrows engine state.
#[derive(Debug, Clone, Copy)]
pub struct RecordMapper<'e> {
    registry: &'e SchemaRegistry,
    hooks: &'e HookDispatcher,
    config: &'e EngineConfig,
}

impl<'e> RecordMapper<'e> {
    pub fn new(
        registry: &'e SchemaRegistry,
        hooks: &'e HookDispatcher,
        config: &'e EngineConfig,
    ) -> Self {
        Self {
            registry,
            hooks,
            config,
        }
    }

    /// Inserts a new record and assigns its generated key.
    ///
    /// # Errors
    /// - `Validation` for persisted records, unknown fields, type mismatches,
    ///   nulls in non-nullable fields and missing required fields.
    /// - `Hook` when BeforeCreate or AfterCreate fails. After an AfterCreate
    ///   failure the row exists and `record` carries its key.
    /// - `UniqueConstraint` when storage rejects a duplicate value.
    pub fn create(&self, exec: &dyn Executor, record: &mut Record) -> OrmResult<i64> {
        let descriptor = self.registry.lookup(record.model())?;
        let conn = exec.connection()?;

        if !record.is_new() {
            return Err(
                ValidationError::new(descriptor.name(), ValidationErrorKind::AlreadyPersisted)
                    .into(),
            );
        }

        // Nothing reaches `record` until the row exists.
        let mut staged = record.clone();
        for field in descriptor.fields() {
            if let Some(default) = &field.default {
                if staged.get(&field.name).is_none() {
                    staged.set(field.name.clone(), default.clone());
                }
            }
        }
        validate_insert(descriptor, staged.fields())?;

        self.hooks.dispatch(HookPoint::BeforeCreate, &mut staged)?;
        validate_insert(descriptor, staged.fields())?;

        let now = Value::Integer(now_millis());
        if descriptor.managed_field(CREATED_AT_FIELD).is_some() {
            staged.set(CREATED_AT_FIELD, now.clone());
        }
        if descriptor.managed_field(UPDATED_AT_FIELD).is_some() {
            staged.set(UPDATED_AT_FIELD, now);
        }
        if descriptor.supports_soft_delete() {
            staged.set(DELETED_AT_FIELD, Value::Null);
        }

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for field in descriptor.fields() {
            if let Some(value) = staged.get(&field.name) {
                columns.push(quote(&field.name));
                values.push(value);
            }
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(descriptor.table()))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(descriptor.table()),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };

        conn.execute(&sql, params_from_iter(values))
            .map_err(|err| map_write_error(descriptor, err))?;
        let key = conn.last_insert_rowid();
        staged.assign_key(key);
        *record = staged;
        debug!(
            "event=record_create module=repo status=ok model={} key={key}",
            descriptor.name()
        );

        self.after_hook(exec, HookPoint::AfterCreate, record)?;
        Ok(key)
    }

    /// Loads a live record by primary key.
    pub fn find_by_key(&self, exec: &dyn Executor, model: &str, key: i64) -> OrmResult<Record> {
        let descriptor = self.registry.lookup(model)?;
        let conn = exec.connection()?;

        let predicate = Predicate::eq(descriptor.primary_key_name(), key);
        let (where_sql, binds) = where_clause(descriptor, Some(&predicate), false)?;
        let sql = format!(
            "SELECT {} FROM {}{where_sql}",
            column_list(descriptor),
            quote(descriptor.table())
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds.iter()))?;
        match rows.next()? {
            Some(row) => parse_row(descriptor, row),
            None => Err(OrmError::NotFound {
                model: descriptor.name().to_string(),
                key,
            }),
        }
    }

    /// Lazy cursor over live records matching `predicate`, in key order.
    pub fn find_where<'a>(
        &self,
        exec: &'a dyn Executor,
        model: &str,
        predicate: Predicate,
    ) -> OrmResult<RecordCursor<'a>>
    where
        'e: 'a,
    {
        self.find(exec, model, &FindQuery::new().filter(predicate))
    }

    /// Lazy cursor honoring ordering, paging, visibility and eager loading.
    pub fn find<'a>(
        &self,
        exec: &'a dyn Executor,
        model: &str,
        query: &FindQuery,
    ) -> OrmResult<RecordCursor<'a>>
    where
        'e: 'a,
    {
        let registry: &'a SchemaRegistry = self.registry;
        let descriptor = registry.lookup(model)?;
        RecordCursor::open(
            exec.connection()?,
            registry,
            descriptor,
            query,
            self.config.cursor_batch_size,
        )
    }

    /// First live record matching `predicate` in key order.
    pub fn first(
        &self,
        exec: &dyn Executor,
        model: &str,
        predicate: Predicate,
    ) -> OrmResult<Option<Record>> {
        let query = FindQuery::new().filter(predicate).limit(1);
        self.find(exec, model, &query)?.next().transpose()
    }

    /// Number of live records matching `predicate` (all when `None`).
    pub fn count(
        &self,
        exec: &dyn Executor,
        model: &str,
        predicate: Option<&Predicate>,
    ) -> OrmResult<u64> {
        let descriptor = self.registry.lookup(model)?;
        let conn = exec.connection()?;

        let (where_sql, binds) = where_clause(descriptor, predicate, false)?;
        let sql = format!("SELECT COUNT(*) FROM {}{where_sql}", quote(descriptor.table()));
        let count: i64 = conn.query_row(&sql, params_from_iter(binds.iter()), |row| row.get(0))?;
        u64::try_from(count).map_err(|_| OrmError::InvalidData(format!("negative count {count}")))
    }

    /// Writes only the named fields and refreshes `updated_at`.
    ///
    /// An empty change set is a no-op. On success `record` reflects the
    /// written values, including edits made by the BeforeUpdate hook.
    pub fn update_fields<I, K, V>(
        &self,
        exec: &dyn Executor,
        record: &mut Record,
        changes: I,
    ) -> OrmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let descriptor = self.registry.lookup(record.model())?;
        let changes: FieldMap = changes
            .into_iter()
            .map(|(field, value)| (field.into(), value.into()))
            .collect();
        if changes.is_empty() {
            return Ok(());
        }
        self.write_update(exec, descriptor, record, changes)
    }

    /// Single-field form of `update_fields`.
    pub fn update_field(
        &self,
        exec: &dyn Executor,
        record: &mut Record,
        field: &str,
        value: impl Into<Value>,
    ) -> OrmResult<()> {
        self.update_fields(exec, record, [(field, value.into())])
    }

    /// Writes every declared field of `record`.
    ///
    /// # Errors
    /// - `Validation(MissingRequired)` naming the first declared field the
    ///   record lacks.
    pub fn update_full(&self, exec: &dyn Executor, record: &mut Record) -> OrmResult<()> {
        let descriptor = self.registry.lookup(record.model())?;

        let mut changes = FieldMap::new();
        for field in descriptor.fields() {
            if field.is_managed() {
                continue;
            }
            let value = record.get(&field.name).ok_or_else(|| {
                ValidationError::for_field(
                    descriptor.name(),
                    field.name.clone(),
                    ValidationErrorKind::MissingRequired,
                )
            })?;
            changes.insert(field.name.clone(), value.clone());
        }
        for name in record.fields().keys() {
            if descriptor.field(name).is_none() {
                return Err(ValidationError::for_field(
                    descriptor.name(),
                    name.clone(),
                    ValidationErrorKind::UnknownField,
                )
                .into());
            }
        }
        if changes.is_empty() {
            return Ok(());
        }
        self.write_update(exec, descriptor, record, changes)
    }

    /// Soft delete: stamps `deleted_at`, the row stays in storage.
    ///
    /// # Errors
    /// - `Validation(SoftDeleteUnsupported)` for models without `deleted_at`.
    /// - `NotFound` when no live row has the record's key.
    pub fn delete(&self, exec: &dyn Executor, record: &mut Record) -> OrmResult<()> {
        let descriptor = self.registry.lookup(record.model())?;
        if !descriptor.supports_soft_delete() {
            return Err(ValidationError::new(
                descriptor.name(),
                ValidationErrorKind::SoftDeleteUnsupported,
            )
            .into());
        }
        let key = persisted_key(descriptor, record)?;
        let conn = exec.connection()?;

        self.hooks.dispatch(HookPoint::BeforeDelete, record)?;

        let now = now_millis();
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2 AND {} IS NULL",
            quote(descriptor.table()),
            quote(DELETED_AT_FIELD),
            quote(descriptor.primary_key_name()),
            quote(DELETED_AT_FIELD)
        );
        let changed = conn
            .execute(&sql, rusqlite::params![now, key])
            .map_err(|err| map_write_error(descriptor, err))?;
        if changed == 0 {
            return Err(OrmError::NotFound {
                model: descriptor.name().to_string(),
                key,
            });
        }
        record.set(DELETED_AT_FIELD, now);
        debug!(
            "event=record_delete module=repo status=ok model={} key={key} mode=soft",
            descriptor.name()
        );

        self.after_hook(exec, HookPoint::AfterDelete, record)
    }

    /// Physically removes the row, soft-deleted or not.
    pub fn hard_delete(&self, exec: &dyn Executor, record: &mut Record) -> OrmResult<()> {
        let descriptor = self.registry.lookup(record.model())?;
        let key = persisted_key(descriptor, record)?;
        let conn = exec.connection()?;

        self.hooks.dispatch(HookPoint::BeforeDelete, record)?;

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(descriptor.table()),
            quote(descriptor.primary_key_name())
        );
        let changed = conn
            .execute(&sql, [key])
            .map_err(|err| map_write_error(descriptor, err))?;
        if changed == 0 {
            return Err(OrmError::NotFound {
                model: descriptor.name().to_string(),
                key,
            });
        }
        debug!(
            "event=record_delete module=repo status=ok model={} key={key} mode=hard",
            descriptor.name()
        );

        self.after_hook(exec, HookPoint::AfterDelete, record)
    }

    fn write_update(
        &self,
        exec: &dyn Executor,
        descriptor: &ModelDescriptor,
        record: &mut Record,
        changes: FieldMap,
    ) -> OrmResult<()> {
        let key = persisted_key(descriptor, record)?;
        let conn = exec.connection()?;
        validate_changes(descriptor, &changes)?;

        let mut staged = record.clone();
        for (field, value) in &changes {
            staged.set(field.clone(), value.clone());
        }
        self.hooks.dispatch(HookPoint::BeforeUpdate, &mut staged)?;

        // Hook edits to other fields are written along with the changes.
        let mut written = changes;
        for (field, value) in staged.fields() {
            if record.get(field) != Some(value) {
                written.insert(field.clone(), value.clone());
            }
        }
        validate_changes(descriptor, &written)?;

        if descriptor.managed_field(UPDATED_AT_FIELD).is_some() {
            let now = Value::Integer(now_millis());
            staged.set(UPDATED_AT_FIELD, now.clone());
            written.insert(UPDATED_AT_FIELD.to_string(), now);
        }

        let assignments = written
            .keys()
            .map(|field| format!("{} = ?", quote(field)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = ?",
            quote(descriptor.table()),
            quote(descriptor.primary_key_name())
        );
        if descriptor.supports_soft_delete() {
            sql.push_str(&format!(" AND {} IS NULL", quote(DELETED_AT_FIELD)));
        }

        let mut binds: Vec<Value> = written.into_values().collect();
        binds.push(Value::Integer(key));
        let changed = conn
            .execute(&sql, params_from_iter(binds.iter()))
            .map_err(|err| map_write_error(descriptor, err))?;
        if changed == 0 {
            return Err(OrmError::NotFound {
                model: descriptor.name().to_string(),
                key,
            });
        }

        *record = staged;
        debug!(
            "event=record_update module=repo status=ok model={} key={key}",
            descriptor.name()
        );
        self.after_hook(exec, HookPoint::AfterUpdate, record)
    }

    fn after_hook(
        &self,
        exec: &dyn Executor,
        point: HookPoint,
        record: &mut Record,
    ) -> OrmResult<()> {
        let result = self.hooks.dispatch(point, record);
        if result.is_err() && self.config.after_hook_policy == AfterHookPolicy::RollbackOnly {
            let marked = exec.mark_rollback_only();
            warn!(
                "event=after_hook_policy module=repo status=rollback_only model={} point={point} marked={marked}",
                record.model()
            );
        }
        result
    }
}

/// Maps constraint failures of a write on `descriptor` to engine errors.
pub(crate) fn map_write_error(descriptor: &ModelDescriptor, err: rusqlite::Error) -> OrmError {
    let rusqlite::Error::SqliteFailure(failure, message) = &err else {
        return err.into();
    };
    let code = failure.extended_code;
    let column = message
        .as_deref()
        .and_then(|message| CONSTRAINT_COLUMN_RE.captures(message))
        .and_then(|captures| captures.get(1))
        .map(|column| column.as_str().to_string());

    match code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            OrmError::UniqueConstraint {
                model: descriptor.name().to_string(),
                field: column,
            }
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
            ValidationError::new(descriptor.name(), ValidationErrorKind::ForeignKeyViolation)
                .into()
        }
        ffi::SQLITE_CONSTRAINT_NOTNULL => ValidationError {
            model: descriptor.name().to_string(),
            field: column,
            kind: ValidationErrorKind::NullNotAllowed,
        }
        .into(),
        _ => err.into(),
    }
}

pub(crate) fn persisted_key(descriptor: &ModelDescriptor, record: &Record) -> OrmResult<i64> {
    record.key().ok_or_else(|| {
        ValidationError::new(descriptor.name(), ValidationErrorKind::NotPersisted).into()
    })
}

fn now_millis() -> i64 {
    epoch_millis(SystemTime::now())
}

/// Milliseconds since the epoch; a clock behind the epoch reads as 0.
fn epoch_millis(now: SystemTime) -> i64 {
    match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(err) => {
            warn!(
                "event=clock_read module=repo status=before_epoch behind_ms={}",
                err.duration().as_millis()
            );
            0
        }
    }
}

/// Checks a full insert field map: known, writable, typed, complete.
fn validate_insert(descriptor: &ModelDescriptor, fields: &FieldMap) -> OrmResult<()> {
    for (name, value) in fields {
        let field = known_field(descriptor, name)?;
        if field.is_managed() {
            return Err(ValidationError::for_field(
                descriptor.name(),
                name.clone(),
                ValidationErrorKind::ImmutableField,
            )
            .into());
        }
        check_value(descriptor, name, value)?;
    }

    for field in descriptor.fields() {
        if field.is_required() && fields.get(&field.name).map_or(true, Value::is_null) {
            let kind = if fields.contains_key(&field.name) {
                ValidationErrorKind::NullNotAllowed
            } else {
                ValidationErrorKind::MissingRequired
            };
            return Err(
                ValidationError::for_field(descriptor.name(), field.name.clone(), kind).into(),
            );
        }
    }
    Ok(())
}

/// Checks a partial change set: known, writable and typed fields only.
fn validate_changes(descriptor: &ModelDescriptor, changes: &FieldMap) -> OrmResult<()> {
    for (name, value) in changes {
        let field = known_field(descriptor, name)?;
        if field.is_managed() {
            return Err(ValidationError::for_field(
                descriptor.name(),
                name.clone(),
                ValidationErrorKind::ImmutableField,
            )
            .into());
        }
        check_value(descriptor, name, value)?;
    }
    Ok(())
}

fn check_value(descriptor: &ModelDescriptor, name: &str, value: &Value) -> OrmResult<()> {
    let field = known_field(descriptor, name)?;
    if value.is_null() && !field.nullable {
        return Err(ValidationError::for_field(
            descriptor.name(),
            name,
            ValidationErrorKind::NullNotAllowed,
        )
        .into());
    }
    check_fits(descriptor, field, value)
}
