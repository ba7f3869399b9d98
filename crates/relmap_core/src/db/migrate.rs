//! Additive schema migration derived from registered descriptors.
//!
//! # Responsibility
//! - Compare registered models with the live SQLite schema.
//! - Produce and execute ordered, additive migration plans.
//!
//! # Invariants
//! - Plans only create tables, add columns and create indexes; nothing is
//!   dropped, renamed or retyped.
//! - Planning against an up-to-date schema yields an empty plan, so running
//!   a migration twice is a no-op.
//! - Steps run in plan order and stop at the first failure.

use crate::db::DbError;
use crate::error::{OrmError, OrmResult};
use crate::model::descriptor::{ModelDescriptor, RelationKind};
use crate::schema::ddl::{
    add_column_sql, create_join_table_sql, create_table_sql, create_unique_index_sql,
};
use crate::schema::registry::SchemaRegistry;
use crate::tx::Executor;
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// One additive schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStep {
    CreateTable {
        table: String,
        sql: String,
    },
    AddColumn {
        table: String,
        column: String,
        sql: String,
    },
    CreateUniqueIndex {
        table: String,
        column: String,
        sql: String,
    },
    CreateJoinTable {
        table: String,
        sql: String,
    },
}

impl MigrationStep {
    pub fn sql(&self) -> &str {
        match self {
            Self::CreateTable { sql, .. }
            | Self::AddColumn { sql, .. }
            | Self::CreateUniqueIndex { sql, .. }
            | Self::CreateJoinTable { sql, .. } => sql,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::CreateUniqueIndex { table, .. }
            | Self::CreateJoinTable { table, .. } => table,
        }
    }
}

impl Display for MigrationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateTable { table, .. } => write!(f, "create_table {table}"),
            Self::AddColumn { table, column, .. } => write!(f, "add_column {table}.{column}"),
            Self::CreateUniqueIndex { table, column, .. } => {
                write!(f, "create_unique_index {table}.{column}")
            }
            Self::CreateJoinTable { table, .. } => write!(f, "create_join_table {table}"),
        }
    }
}

/// Ordered list of steps bringing the live schema up to date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Migration planner and executor over a registry.
#[derive(Debug, Clone, Copy)]
pub struct MigrationEngine<'e> {
    registry: &'e SchemaRegistry,
}

impl<'e> MigrationEngine<'e> {
    pub fn new(registry: &'e SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Plans the steps needed for one model and its join tables.
    pub fn plan(&self, exec: &dyn Executor, model: &str) -> OrmResult<MigrationPlan> {
        let descriptor = self.registry.lookup(model)?;
        let conn = exec.connection()?;
        let mut plan = MigrationPlan::default();
        self.plan_model(conn, descriptor, &mut BTreeSet::new(), &mut plan)?;
        Ok(plan)
    }

    /// Plans every registered model in registration order.
    ///
    /// A join table shared by two declarations is created once.
    pub fn plan_all(&self, exec: &dyn Executor) -> OrmResult<MigrationPlan> {
        let conn = exec.connection()?;
        let mut plan = MigrationPlan::default();
        let mut join_tables = BTreeSet::new();
        for descriptor in self.registry.models() {
            self.plan_model(conn, descriptor, &mut join_tables, &mut plan)?;
        }
        Ok(plan)
    }

    /// Executes `plan` in order and returns the number of applied steps.
    ///
    /// DDL is not rolled back on failure: steps before the failing one stay
    /// applied unless `exec` is a transaction the caller rolls back.
    ///
    /// # Errors
    /// - `Migration { step_index, .. }` naming the first failing step.
    pub fn apply(&self, exec: &dyn Executor, plan: &MigrationPlan) -> OrmResult<usize> {
        let conn = exec.connection()?;
        let started_at = Instant::now();
        info!(
            "event=migrate_apply module=db status=start steps={}",
            plan.len()
        );

        for (step_index, step) in plan.steps().iter().enumerate() {
            if let Err(err) = conn.execute_batch(step.sql()) {
                error!(
                    "event=migrate_apply module=db status=error step_index={step_index} step=\"{step}\" duration_ms={} error_code=migration_step_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(OrmError::Migration {
                    step_index,
                    step: step.to_string(),
                    source: DbError::Sqlite(err),
                });
            }
        }

        info!(
            "event=migrate_apply module=db status=ok steps={} duration_ms={}",
            plan.len(),
            started_at.elapsed().as_millis()
        );
        Ok(plan.len())
    }

    /// Plans and applies everything pending for all registered models.
    pub fn auto_migrate(&self, exec: &dyn Executor) -> OrmResult<usize> {
        let plan = self.plan_all(exec)?;
        if plan.is_empty() {
            info!("event=migrate_apply module=db status=skipped reason=up_to_date");
            return Ok(0);
        }
        self.apply(exec, &plan)
    }

    fn plan_model(
        &self,
        conn: &Connection,
        descriptor: &ModelDescriptor,
        join_tables: &mut BTreeSet<String>,
        plan: &mut MigrationPlan,
    ) -> OrmResult<()> {
        let table = descriptor.table();

        match live_table(conn, table)? {
            None => plan.steps.push(MigrationStep::CreateTable {
                table: table.to_string(),
                sql: create_table_sql(self.registry, descriptor)?,
            }),
            Some(live) => {
                for field in descriptor.fields() {
                    match live.columns.get(&field.name) {
                        None => {
                            plan.steps.push(MigrationStep::AddColumn {
                                table: table.to_string(),
                                column: field.name.clone(),
                                sql: add_column_sql(self.registry, descriptor, field)?,
                            });
                            if field.unique {
                                plan.steps.push(unique_index_step(table, &field.name));
                            }
                        }
                        Some(declared) => {
                            if !declared.eq_ignore_ascii_case(field.field_type.sql_type()) {
                                warn!(
                                    "event=migrate_plan module=db status=skipped reason=type_mismatch table={table} column={} live_type={declared} declared_type={}",
                                    field.name,
                                    field.field_type.sql_type()
                                );
                            }
                            if field.unique && !live.unique_columns.contains(&field.name) {
                                plan.steps.push(unique_index_step(table, &field.name));
                            }
                        }
                    }
                }
            }
        }

        for relation in descriptor.relations() {
            if relation.kind != RelationKind::ManyToMany {
                continue;
            }
            let Some(join) = descriptor.join_table(relation) else {
                continue;
            };
            if join_tables.contains(&join.table) || live_table(conn, &join.table)?.is_some() {
                continue;
            }
            let target = self.registry.lookup(&relation.target)?;
            plan.steps.push(MigrationStep::CreateJoinTable {
                table: join.table.clone(),
                sql: create_join_table_sql(&join, descriptor, target),
            });
            join_tables.insert(join.table);
        }

        Ok(())
    }
}

fn unique_index_step(table: &str, column: &str) -> MigrationStep {
    MigrationStep::CreateUniqueIndex {
        table: table.to_string(),
        column: column.to_string(),
        sql: create_unique_index_sql(table, column),
    }
}

/// Columns (with declared types) and single-column unique indexes.
struct LiveTable {
    columns: BTreeMap<String, String>,
    unique_columns: BTreeSet<String>,
}

fn live_table(conn: &Connection, table: &str) -> OrmResult<Option<LiveTable>> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }

    let mut columns = BTreeMap::new();
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let declared: String = row.get(2)?;
        columns.insert(name, declared);
    }

    let mut unique_columns = BTreeSet::new();
    let mut indexes = conn.prepare(&format!("PRAGMA index_list(\"{table}\");"))?;
    let unique_indexes = indexes
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (index, unique) in unique_indexes {
        if unique != 1 {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info(\"{index}\");"))?;
        let indexed = info
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<Result<Vec<_>, _>>()?;
        if let [Some(column)] = indexed.as_slice() {
            unique_columns.insert(column.clone());
        }
    }

    Ok(Some(LiveTable {
        columns,
        unique_columns,
    }))
}

fn table_exists(conn: &Connection, table: &str) -> OrmResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
