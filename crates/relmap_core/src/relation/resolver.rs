//! Loading of related records and many-to-many link maintenance.
//!
//! # Responsibility
//! - Resolve one-to-one, one-to-many and many-to-many relations on demand.
//! - Insert and remove join rows for many-to-many relations.
//!
//! # Invariants
//! - Relation targets and foreign-key columns are checked when a relation is
//!   first used, not at declaration time.
//! - A many-to-many load yields each target at most once, however many join
//!   rows point at it.

use crate::config::EngineConfig;
use crate::error::{OrmError, OrmResult, ValidationError, ValidationErrorKind};
use crate::model::descriptor::{JoinTable, ModelDescriptor, RelationDecl, RelationKind};
use crate::model::record::{Record, RelatedRecords};
use crate::repo::query::{FindQuery, Predicate, RecordCursor};
use crate::repo::record_mapper::{map_write_error, persisted_key};
use crate::schema::ddl::quote;
use crate::schema::registry::SchemaRegistry;
use crate::tx::Executor;
use log::debug;
use rusqlite::Connection;
use std::collections::BTreeSet;

/// Result of loading one relation.
#[derive(Debug)]
pub enum Related<'a> {
    One(Option<Record>),
    Many(RecordCursor<'a>),
}

impl Related<'_> {
    /// Drains the relation into its eager form.
    pub fn collect(self) -> OrmResult<RelatedRecords> {
        match self {
            Self::One(record) => Ok(RelatedRecords::One(record.map(Box::new))),
            Self::Many(cursor) => Ok(RelatedRecords::Many(cursor.collect::<OrmResult<_>>()?)),
        }
    }
}

/// Relation operations. Cheap to construct; borrows engine state.
#[derive(Debug, Clone, Copy)]
pub struct RelationResolver<'e> {
    registry: &'e SchemaRegistry,
    config: &'e EngineConfig,
}

impl<'e> RelationResolver<'e> {
    pub fn new(registry: &'e SchemaRegistry, config: &'e EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Loads `relation` of a persisted `owner`.
    ///
    /// # Errors
    /// - `Validation(UnknownRelation)` when the owner model lacks `relation`.
    /// - `UnknownModel` when the relation target is not registered.
    /// - `Validation(UnknownField)` when the foreign-key column is missing on
    ///   the target.
    /// - `Validation(NotPersisted)` when `owner` has no key.
    pub fn load<'a>(
        &self,
        exec: &'a dyn Executor,
        owner: &Record,
        relation: &str,
    ) -> OrmResult<Related<'a>>
    where
        'e: 'a,
    {
        let registry: &'a SchemaRegistry = self.registry;
        let descriptor = registry.lookup(owner.model())?;
        let key = persisted_key(descriptor, owner)?;
        let relation = relation_of(descriptor, relation)?;
        resolve(
            exec.connection()?,
            registry,
            descriptor,
            key,
            relation,
            self.config.cursor_batch_size,
        )
    }

    /// Adds a join row between `owner` and `target`.
    ///
    /// Returns `false` when the pair was already linked.
    pub fn link(
        &self,
        exec: &dyn Executor,
        owner: &Record,
        relation: &str,
        target: &Record,
    ) -> OrmResult<bool> {
        let link = self.link_keys(owner, relation, target)?;
        let conn = exec.connection()?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
            quote(&link.join.table),
            quote(&link.join.owner_key),
            quote(&link.join.target_key)
        );
        let inserted = conn
            .execute(&sql, [link.owner_key, link.target_key])
            .map_err(|err| map_write_error(link.descriptor, err))?;
        debug!(
            "event=relation_link module=relation status=ok model={} relation={relation} inserted={}",
            link.descriptor.name(),
            inserted > 0
        );
        Ok(inserted > 0)
    }

    /// Removes every join row between `owner` and `target`.
    ///
    /// Returns `false` when the pair was not linked.
    pub fn unlink(
        &self,
        exec: &dyn Executor,
        owner: &Record,
        relation: &str,
        target: &Record,
    ) -> OrmResult<bool> {
        let link = self.link_keys(owner, relation, target)?;
        let conn = exec.connection()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
            quote(&link.join.table),
            quote(&link.join.owner_key),
            quote(&link.join.target_key)
        );
        let removed = conn.execute(&sql, [link.owner_key, link.target_key])?;
        debug!(
            "event=relation_unlink module=relation status=ok model={} relation={relation} removed={removed}",
            link.descriptor.name()
        );
        Ok(removed > 0)
    }

    fn link_keys(
        &self,
        owner: &Record,
        relation: &str,
        target: &Record,
    ) -> OrmResult<LinkKeys<'e>> {
        let descriptor = self.registry.lookup(owner.model())?;
        let decl = relation_of(descriptor, relation)?;
        let join = descriptor.join_table(decl).ok_or_else(|| {
            ValidationError::for_field(
                descriptor.name(),
                relation,
                ValidationErrorKind::IncompleteRelation("link needs a many-to-many relation"),
            )
        })?;
        let target_descriptor = self.registry.lookup(&decl.target)?;
        if target.model() != target_descriptor.name() {
            return Err(ValidationError::for_field(
                descriptor.name(),
                relation,
                ValidationErrorKind::InvalidForeignKey,
            )
            .into());
        }

        Ok(LinkKeys {
            descriptor,
            join,
            owner_key: persisted_key(descriptor, owner)?,
            target_key: persisted_key(target_descriptor, target)?,
        })
    }
}

struct LinkKeys<'e> {
    descriptor: &'e ModelDescriptor,
    join: JoinTable,
    owner_key: i64,
    target_key: i64,
}

/// Loads each relation in `eager` and stores it on `record`.
pub(crate) fn attach_eager(
    conn: &Connection,
    registry: &SchemaRegistry,
    record: &mut Record,
    eager: &[String],
    batch_size: u32,
) -> OrmResult<()> {
    if eager.is_empty() {
        return Ok(());
    }
    let descriptor = registry.lookup(record.model())?;
    let key = persisted_key(descriptor, record)?;
    for name in eager {
        let relation = relation_of(descriptor, name)?;
        let related = resolve(conn, registry, descriptor, key, relation, batch_size)?.collect()?;
        record.attach_related(name, related);
    }
    Ok(())
}

fn relation_of<'d>(descriptor: &'d ModelDescriptor, name: &str) -> OrmResult<&'d RelationDecl> {
    descriptor.relation(name).ok_or_else(|| {
        ValidationError::for_field(descriptor.name(), name, ValidationErrorKind::UnknownRelation)
            .into()
    })
}

fn resolve<'a>(
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    owner: &ModelDescriptor,
    key: i64,
    relation: &RelationDecl,
    batch_size: u32,
) -> OrmResult<Related<'a>> {
    let target = registry.lookup(&relation.target)?;

    match relation.kind {
        RelationKind::OneToOne | RelationKind::OneToMany => {
            let foreign_key = relation.foreign_key.as_deref().ok_or_else(|| {
                ValidationError::for_field(
                    owner.name(),
                    relation.name.clone(),
                    ValidationErrorKind::IncompleteRelation("missing foreign key column"),
                )
            })?;
            if target.field(foreign_key).is_none() {
                return Err(ValidationError::for_field(
                    target.name(),
                    foreign_key,
                    ValidationErrorKind::UnknownField,
                )
                .into());
            }

            let mut query = FindQuery::new().filter(Predicate::eq(foreign_key, key));
            if relation.kind == RelationKind::OneToOne {
                query = query.limit(1);
                let mut cursor = RecordCursor::open(conn, registry, target, &query, batch_size)?;
                return Ok(Related::One(cursor.next().transpose()?));
            }
            let cursor = RecordCursor::open(conn, registry, target, &query, batch_size)?;
            Ok(Related::Many(cursor))
        }
        RelationKind::ManyToMany => {
            let join = owner.join_table(relation).ok_or_else(|| {
                ValidationError::for_field(
                    owner.name(),
                    relation.name.clone(),
                    ValidationErrorKind::IncompleteRelation("missing join table"),
                )
            })?;
            let target_keys = linked_keys(conn, &join, key)?;
            debug!(
                "event=relation_load module=relation status=ok model={} relation={} targets={}",
                owner.name(),
                relation.name,
                target_keys.len()
            );
            let query = FindQuery::new().filter(Predicate::in_set(
                target.primary_key_name(),
                target_keys,
            ));
            let cursor = RecordCursor::open(conn, registry, target, &query, batch_size)?;
            Ok(Related::Many(cursor))
        }
    }
}

/// Distinct target keys linked to `owner_key`.
fn linked_keys(conn: &Connection, join: &JoinTable, owner_key: i64) -> OrmResult<BTreeSet<i64>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        quote(&join.target_key),
        quote(&join.table),
        quote(&join.owner_key)
    );
    let mut stmt = conn.prepare(&sql)?;
    let keys = stmt
        .query_map([owner_key], |row| row.get::<_, i64>(0))?
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(OrmError::from)?;
    Ok(keys)
}
