//! DDL derivation from registered descriptors.
//!
//! All identifiers reaching this module were validated by the registry, so
//! they are interpolated with plain double quotes.

use crate::error::OrmResult;
use crate::model::descriptor::{FieldSpec, JoinTable, ModelDescriptor};
use crate::schema::registry::SchemaRegistry;

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

/// `CREATE TABLE` statement for a model, unique columns declared inline.
pub fn create_table_sql(registry: &SchemaRegistry, descriptor: &ModelDescriptor) -> OrmResult<String> {
    let mut columns = Vec::with_capacity(descriptor.fields().len());
    for field in descriptor.fields() {
        columns.push(column_definition(registry, field, false)?);
    }
    Ok(format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote(descriptor.table()),
        columns.join(",\n    ")
    ))
}

/// `ALTER TABLE .. ADD COLUMN` statement.
///
/// SQLite cannot add a `UNIQUE` column, so uniqueness is a separate index step.
pub fn add_column_sql(
    registry: &SchemaRegistry,
    descriptor: &ModelDescriptor,
    field: &FieldSpec,
) -> OrmResult<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {};",
        quote(descriptor.table()),
        column_definition(registry, field, true)?
    ))
}

pub fn unique_index_name(table: &str, column: &str) -> String {
    format!("ux_{table}_{column}")
}

pub fn create_unique_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
        quote(&unique_index_name(table, column)),
        quote(table),
        quote(column)
    )
}

/// Link table with two cascading foreign keys and composite uniqueness.
pub fn create_join_table_sql(
    join: &JoinTable,
    owner: &ModelDescriptor,
    target: &ModelDescriptor,
) -> String {
    format!(
        "CREATE TABLE {table} (\n    {owner_key} INTEGER NOT NULL REFERENCES {owner_table}({owner_pk}) ON DELETE CASCADE,\n    {target_key} INTEGER NOT NULL REFERENCES {target_table}({target_pk}) ON DELETE CASCADE,\n    UNIQUE ({owner_key}, {target_key})\n);",
        table = quote(&join.table),
        owner_key = quote(&join.owner_key),
        target_key = quote(&join.target_key),
        owner_table = quote(owner.table()),
        owner_pk = quote(owner.primary_key_name()),
        target_table = quote(target.table()),
        target_pk = quote(target.primary_key_name()),
    )
}

fn column_definition(
    registry: &SchemaRegistry,
    field: &FieldSpec,
    for_alter: bool,
) -> OrmResult<String> {
    let mut definition = format!("{} {}", quote(&field.name), field.field_type.sql_type());

    if field.primary_key {
        definition.push_str(" PRIMARY KEY AUTOINCREMENT");
        return Ok(definition);
    }

    if !field.nullable {
        definition.push_str(" NOT NULL");
    }
    if field.unique && !for_alter {
        definition.push_str(" UNIQUE");
    }

    let default = match (&field.default, for_alter && !field.nullable) {
        (Some(value), _) => Some(value.clone()),
        // Existing rows need a value for the new required column.
        (None, true) => Some(field.field_type.zero_value()),
        (None, false) => None,
    };
    if let Some(value) = default {
        definition.push_str(" DEFAULT ");
        definition.push_str(&value.to_sql_literal());
    }

    if let Some(target) = &field.foreign_key_of {
        let target = registry.lookup(target)?;
        definition.push_str(&format!(
            " REFERENCES {}({})",
            quote(target.table()),
            quote(target.primary_key_name())
        ));
    }

    Ok(definition)
}
