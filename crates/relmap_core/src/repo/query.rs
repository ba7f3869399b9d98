//! Structured predicates, find options and the lazy record cursor.
//!
//! # Invariants
//! - Every field named by a predicate or ordering exists on the model; values
//!   are bound as parameters, never interpolated.
//! - Soft-deleted rows are excluded unless `include_deleted` is set.
//! - Rows come in primary-key order after any explicit ordering, so batched
//!   fetching stays deterministic.
//! - A cursor resumes after the last row it returned, never by row count.

use crate::error::{OrmError, OrmResult, ValidationError, ValidationErrorKind};
use crate::model::descriptor::{FieldSpec, ModelDescriptor, DELETED_AT_FIELD};
use crate::model::record::{FieldMap, Record};
use crate::model::value::Value;
use crate::relation::resolver::attach_eager;
use crate::schema::ddl::quote;
use crate::schema::registry::SchemaRegistry;
use log::debug;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::VecDeque;

/// Comparison operator of a field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Operator {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Structured condition over one model's fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: Operator,
        value: Value,
    },
    IsNull(String),
    NotNull(String),
    InSet {
        field: String,
        values: Vec<Value>,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Ge, value)
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(field, Operator::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Self::NotNull(field.into())
    }

    pub fn in_set<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::InSet {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = match self {
            Self::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Self::And(parts)
    }

    fn render(
        &self,
        descriptor: &ModelDescriptor,
        sql: &mut String,
        binds: &mut Vec<Value>,
    ) -> OrmResult<()> {
        match self {
            Self::Compare { field, op, value } => {
                let spec = known_field(descriptor, field)?;
                if value.is_null() {
                    return Err(ValidationError::for_field(
                        descriptor.name(),
                        field.clone(),
                        ValidationErrorKind::InvalidPredicate("compare with null; use is_null"),
                    )
                    .into());
                }
                if *op == Operator::Like && value.as_str().is_none() {
                    return Err(ValidationError::for_field(
                        descriptor.name(),
                        field.clone(),
                        ValidationErrorKind::InvalidPredicate("like needs a text pattern"),
                    )
                    .into());
                }
                if *op != Operator::Like {
                    check_fits(descriptor, spec, value)?;
                }
                sql.push_str(&format!("{} {} ?", quote(field), op.sql()));
                binds.push(value.clone());
            }
            Self::IsNull(field) => {
                known_field(descriptor, field)?;
                sql.push_str(&format!("{} IS NULL", quote(field)));
            }
            Self::NotNull(field) => {
                known_field(descriptor, field)?;
                sql.push_str(&format!("{} IS NOT NULL", quote(field)));
            }
            Self::InSet { field, values } => {
                let spec = known_field(descriptor, field)?;
                if values.is_empty() {
                    sql.push_str("0 = 1");
                    return Ok(());
                }
                for value in values {
                    if value.is_null() {
                        return Err(ValidationError::for_field(
                            descriptor.name(),
                            field.clone(),
                            ValidationErrorKind::InvalidPredicate("null inside in-set"),
                        )
                        .into());
                    }
                    check_fits(descriptor, spec, value)?;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{} IN ({placeholders})", quote(field)));
                binds.extend(values.iter().cloned());
            }
            Self::And(parts) => {
                if parts.is_empty() {
                    sql.push_str("1 = 1");
                    return Ok(());
                }
                sql.push('(');
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        sql.push_str(" AND ");
                    }
                    part.render(descriptor, sql, binds)?;
                }
                sql.push(')');
            }
        }
        Ok(())
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Options for `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub predicate: Option<Predicate>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Also return soft-deleted rows.
    pub include_deleted: bool,
    /// Relations resolved for every returned record.
    pub eager: Vec<String>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn eager(mut self, relation: impl Into<String>) -> Self {
        self.eager.push(relation.into());
        self
    }
}

/// Lazy, finite, one-shot sequence of records.
///
/// Rows are fetched in batches on demand. Each batch resumes strictly after
/// the last row seen in the cursor ordering, so rows the caller updates or
/// deletes mid-iteration never shift later rows out of view. The cursor cannot
/// be restarted; after the last row or the first error it only yields `None`.
pub struct RecordCursor<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    descriptor: &'a ModelDescriptor,
    select: SelectSql,
    eager: Vec<String>,
    batch_size: u32,
    remaining: Option<u64>,
    skip: u64,
    last: Option<Vec<Value>>,
    buffer: VecDeque<Record>,
    finished: bool,
}

impl<'a> RecordCursor<'a> {
    pub(crate) fn open(
        conn: &'a Connection,
        registry: &'a SchemaRegistry,
        descriptor: &'a ModelDescriptor,
        query: &FindQuery,
        batch_size: u32,
    ) -> OrmResult<Self> {
        let select = select_sql(descriptor, query)?;
        for relation in &query.eager {
            if descriptor.relation(relation).is_none() {
                return Err(ValidationError::for_field(
                    descriptor.name(),
                    relation.clone(),
                    ValidationErrorKind::UnknownRelation,
                )
                .into());
            }
        }

        debug!(
            "event=cursor_open module=repo status=ok model={} eager={}",
            descriptor.name(),
            query.eager.len()
        );

        Ok(Self {
            conn,
            registry,
            descriptor,
            select,
            eager: query.eager.clone(),
            batch_size: batch_size.max(1),
            remaining: query.limit,
            skip: query.offset,
            last: None,
            buffer: VecDeque::new(),
            finished: false,
        })
    }

    pub fn model(&self) -> &str {
        self.descriptor.name()
    }

    fn fetch_batch(&mut self) -> OrmResult<()> {
        let take = match self.remaining {
            Some(0) => {
                self.finished = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(u64::from(self.batch_size)),
            None => u64::from(self.batch_size),
        };

        let mut binds = self.select.binds.clone();
        let mut sql = self.select.head.clone();
        if let Some(last) = &self.last {
            let after = after_clause(&self.select.ordering, last, &mut binds);
            sql.push_str(if self.select.filtered { " AND (" } else { " WHERE (" });
            sql.push_str(&after);
            sql.push(')');
        }
        sql.push_str(&self.select.order);
        sql.push_str(&format!(" LIMIT {take}"));
        // The caller's offset applies to the first batch only.
        if self.skip > 0 {
            sql.push_str(&format!(" OFFSET {}", self.skip));
            self.skip = 0;
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds.iter()))?;
        let mut fetched = 0u64;
        while let Some(row) = rows.next()? {
            let mut record = parse_row(self.descriptor, row)?;
            self.last = Some(self.select.ordering_values(self.descriptor, &record));
            attach_eager(
                self.conn,
                self.registry,
                &mut record,
                &self.eager,
                self.batch_size,
            )?;
            self.buffer.push_back(record);
            fetched += 1;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
        }
        if fetched < take {
            self.finished = true;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCursor")
            .field("model", &self.descriptor.name())
            .field("eager", &self.eager)
            .field("batch_size", &self.batch_size)
            .field("remaining", &self.remaining)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Iterator for RecordCursor<'_> {
    type Item = OrmResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.buffer.pop_front() {
            return Some(Ok(record));
        }
        if self.finished {
            return None;
        }
        if let Err(err) = self.fetch_batch() {
            self.finished = true;
            self.buffer.clear();
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl std::iter::FusedIterator for RecordCursor<'_> {}

/// Comma separated, quoted column list in descriptor order.
pub(crate) fn column_list(descriptor: &ModelDescriptor) -> String {
    descriptor
        .fields()
        .iter()
        .map(|field| quote(&field.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decodes one row selected with `column_list`.
pub(crate) fn parse_row(descriptor: &ModelDescriptor, row: &Row<'_>) -> OrmResult<Record> {
    let mut key = None;
    let mut fields = FieldMap::new();
    for (index, field) in descriptor.fields().iter().enumerate() {
        let cell = row.get_ref(index)?;
        let value = Value::from_column(field.field_type, cell).map_err(|reason| {
            OrmError::InvalidData(format!(
                "{}.{}: {reason}",
                descriptor.table(),
                field.name
            ))
        })?;
        if field.primary_key {
            key = value.as_i64();
        } else {
            fields.insert(field.name.clone(), value);
        }
    }

    let key = key.ok_or_else(|| {
        OrmError::InvalidData(format!("{}: row without primary key", descriptor.table()))
    })?;
    Ok(Record::from_parts(descriptor.name(), key, fields))
}

pub(crate) fn known_field<'d>(
    descriptor: &'d ModelDescriptor,
    field: &str,
) -> OrmResult<&'d FieldSpec> {
    descriptor.field(field).ok_or_else(|| {
        ValidationError::for_field(descriptor.name(), field, ValidationErrorKind::UnknownField)
            .into()
    })
}

pub(crate) fn check_fits(
    descriptor: &ModelDescriptor,
    field: &FieldSpec,
    value: &Value,
) -> OrmResult<()> {
    if value.fits(field.field_type) {
        return Ok(());
    }
    Err(ValidationError::for_field(
        descriptor.name(),
        field.name.clone(),
        ValidationErrorKind::TypeMismatch {
            expected: field.field_type,
            found: value.kind_name(),
        },
    )
    .into())
}

/// Cursor query split so a resume condition fits between filter and order.
struct SelectSql {
    /// `SELECT ... FROM ...` plus the filter, if any.
    head: String,
    filtered: bool,
    /// ` ORDER BY ...`, always ending with the primary key.
    order: String,
    binds: Vec<Value>,
    ordering: Vec<(String, Direction)>,
}

impl SelectSql {
    /// Values of the ordering columns for `record`.
    fn ordering_values(&self, descriptor: &ModelDescriptor, record: &Record) -> Vec<Value> {
        self.ordering
            .iter()
            .map(|(field, _)| {
                if field == descriptor.primary_key_name() {
                    record.key().map_or(Value::Null, Value::Integer)
                } else {
                    record.get(field).cloned().unwrap_or(Value::Null)
                }
            })
            .collect()
    }
}

fn select_sql(descriptor: &ModelDescriptor, query: &FindQuery) -> OrmResult<SelectSql> {
    let (where_sql, binds) = where_clause(descriptor, query.predicate.as_ref(), query.include_deleted)?;
    let head = format!(
        "SELECT {} FROM {}{where_sql}",
        column_list(descriptor),
        quote(descriptor.table())
    );

    let mut ordering = Vec::with_capacity(query.order_by.len() + 1);
    for (field, direction) in &query.order_by {
        known_field(descriptor, field)?;
        ordering.push((field.clone(), *direction));
    }
    ordering.push((descriptor.primary_key_name().to_string(), Direction::Asc));

    let order = ordering
        .iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            format!("{} {direction}", quote(field))
        })
        .collect::<Vec<_>>()
        .join(", ");

    Ok(SelectSql {
        head,
        filtered: !where_sql.is_empty(),
        order: format!(" ORDER BY {order}"),
        binds,
        ordering,
    })
}

/// Condition matching rows strictly after `last` in `ordering`.
///
/// Expands the tuple comparison column by column so mixed directions work.
/// NULL sorts first ascending and last descending, as SQLite orders it.
fn after_clause(ordering: &[(String, Direction)], last: &[Value], binds: &mut Vec<Value>) -> String {
    let mut branches = Vec::with_capacity(ordering.len());
    for (index, (field, direction)) in ordering.iter().enumerate() {
        let mut parts = Vec::with_capacity(index + 1);
        for (prefix, value) in ordering[..index].iter().zip(last) {
            let column = quote(&prefix.0);
            if value.is_null() {
                parts.push(format!("{column} IS NULL"));
            } else {
                parts.push(format!("{column} = ?"));
                binds.push(value.clone());
            }
        }

        let column = quote(field);
        let value = &last[index];
        parts.push(match (direction, value.is_null()) {
            (Direction::Asc, true) => format!("{column} IS NOT NULL"),
            (Direction::Asc, false) => {
                binds.push(value.clone());
                format!("{column} > ?")
            }
            (Direction::Desc, true) => "0 = 1".to_string(),
            (Direction::Desc, false) => {
                binds.push(value.clone());
                format!("({column} < ? OR {column} IS NULL)")
            }
        });
        branches.push(format!("({})", parts.join(" AND ")));
    }
    branches.join(" OR ")
}

/// ` WHERE ...` (or empty) honoring soft-delete visibility.
pub(crate) fn where_clause(
    descriptor: &ModelDescriptor,
    predicate: Option<&Predicate>,
    include_deleted: bool,
) -> OrmResult<(String, Vec<Value>)> {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    if !include_deleted && descriptor.supports_soft_delete() {
        conditions.push(format!("{} IS NULL", quote(DELETED_AT_FIELD)));
    }
    if let Some(predicate) = predicate {
        let mut rendered = String::new();
        predicate.render(descriptor, &mut rendered, &mut binds)?;
        conditions.push(rendered);
    }

    if conditions.is_empty() {
        return Ok((String::new(), binds));
    }
    Ok((format!(" WHERE {}", conditions.join(" AND ")), binds))
}
