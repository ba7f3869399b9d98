//! Model descriptors: fields, constraints and relation declarations.
//!
//! # Responsibility
//! - Describe a record type explicitly, replacing tag-driven declarations.
//! - Provide the standard field set merged into descriptors at registration.
//!
//! # Invariants
//! - Descriptors are plain data until registered; validation happens in
//!   `SchemaRegistry::register`.
//! - Relation targets are model names and are resolved lazily.

use crate::model::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Primary key column of the standard field set.
pub const ID_FIELD: &str = "id";
/// Creation timestamp column of the standard field set.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Update timestamp column of the standard field set.
pub const UPDATED_AT_FIELD: &str = "updated_at";
/// Soft-delete marker column of the standard field set.
pub const DELETED_AT_FIELD: &str = "deleted_at";

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
    /// Epoch milliseconds.
    Timestamp,
    Blob,
}

impl FieldType {
    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }

    /// Value used to back-fill existing rows when a required column is added.
    pub(crate) fn zero_value(self) -> Value {
        match self {
            Self::Integer | Self::Timestamp => Value::Integer(0),
            Self::Real => Value::Real(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Boolean => Value::Bool(false),
            Self::Blob => Value::Blob(Vec::new()),
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Blob => "blob",
        };
        f.write_str(label)
    }
}

/// Explicit per-field configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub primary_key: bool,
    pub unique: bool,
    /// Name of the model whose primary key this field references.
    pub foreign_key_of: Option<String>,
    /// Set for fields merged from a `FieldSet` whose values the engine owns.
    #[serde(default)]
    pub(crate) managed: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            primary_key: false,
            unique: false,
            foreign_key_of: None,
            managed: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, model: impl Into<String>) -> Self {
        self.foreign_key_of = Some(model.into());
        self
    }

    /// Whether the engine assigns this field (primary key, timestamps).
    pub fn is_managed(&self) -> bool {
        self.managed || self.primary_key
    }

    /// Whether `create` requires a caller-provided value.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.is_managed()
    }

    fn managed(mut self) -> Self {
        self.managed = true;
        self
    }
}

/// Reusable group of fields merged into descriptors at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    fields: Vec<FieldSpec>,
}

impl FieldSet {
    /// Integer `id` key plus created/updated/deleted timestamps.
    pub fn standard() -> Self {
        Self {
            fields: vec![
                FieldSpec::new(ID_FIELD, FieldType::Integer).primary_key(),
                FieldSpec::new(CREATED_AT_FIELD, FieldType::Timestamp).managed(),
                FieldSpec::new(UPDATED_AT_FIELD, FieldType::Timestamp).managed(),
                FieldSpec::new(DELETED_AT_FIELD, FieldType::Timestamp)
                    .nullable()
                    .managed(),
            ],
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// Implicit link table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTable {
    pub table: String,
    /// Column holding the owner's primary key.
    pub owner_key: String,
    /// Column holding the target's primary key.
    pub target_key: String,
}

/// Relation declared on an owning model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// Column on the target referencing the owner (one-to-one, one-to-many).
    pub foreign_key: Option<String>,
    /// Explicit join table name (many-to-many); derived when absent.
    pub join_table: Option<String>,
}

/// Static declaration of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) relations: Vec<RelationDecl>,
    pub(crate) field_set: Option<FieldSet>,
}

impl ModelDescriptor {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        let name = name.into();
        ModelBuilder {
            descriptor: ModelDescriptor {
                table: default_table_name(&name),
                name,
                fields: Vec::new(),
                relations: Vec::new(),
                field_set: Some(FieldSet::standard()),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All fields, including merged standard fields once registered.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relations(&self) -> &[RelationDecl] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDecl> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Primary key field. Registered descriptors always have exactly one.
    pub fn primary_key(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.primary_key)
    }

    pub(crate) fn primary_key_name(&self) -> &str {
        self.primary_key()
            .map_or(ID_FIELD, |field| field.name.as_str())
    }

    pub fn supports_soft_delete(&self) -> bool {
        self.managed_field(DELETED_AT_FIELD).is_some()
    }

    /// Returns the standard-set field with `name`, if this model carries it.
    pub(crate) fn managed_field(&self, name: &str) -> Option<&FieldSpec> {
        self.field(name).filter(|field| field.managed)
    }

    /// Join table metadata for a many-to-many relation.
    pub fn join_table(&self, relation: &RelationDecl) -> Option<JoinTable> {
        if relation.kind != RelationKind::ManyToMany {
            return None;
        }
        let owner = to_snake_case(&self.name);
        let target = to_snake_case(&relation.target);
        Some(JoinTable {
            table: relation
                .join_table
                .clone()
                .unwrap_or_else(|| format!("{owner}_{target}s")),
            owner_key: format!("{owner}_id"),
            target_key: format!("{target}_id"),
        })
    }
}

/// Fluent descriptor builder.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    descriptor: ModelDescriptor,
}

impl ModelBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.descriptor.table = table.into();
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.descriptor.fields.push(field);
        self
    }

    /// Drops the standard field set; the model must then declare its own key.
    pub fn without_standard_fields(mut self) -> Self {
        self.descriptor.field_set = None;
        self
    }

    /// `foreign_key` is the column on `target` holding this model's key.
    pub fn has_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, RelationKind::OneToOne, target, Some(foreign_key.into()), None)
    }

    /// `foreign_key` is the column on `target` holding this model's key.
    pub fn has_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, RelationKind::OneToMany, target, Some(foreign_key.into()), None)
    }

    pub fn many_to_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relation(name, RelationKind::ManyToMany, target, None, None)
    }

    pub fn many_to_many_via(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        self.relation(
            name,
            RelationKind::ManyToMany,
            target,
            None,
            Some(join_table.into()),
        )
    }

    pub fn build(self) -> ModelDescriptor {
        self.descriptor
    }

    fn relation(
        mut self,
        name: impl Into<String>,
        kind: RelationKind,
        target: impl Into<String>,
        foreign_key: Option<String>,
        join_table: Option<String>,
    ) -> Self {
        self.descriptor.relations.push(RelationDecl {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key,
            join_table,
        });
        self
    }
}

/// `UserProfile` -> `user_profile`.
pub(crate) fn to_snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

fn default_table_name(model: &str) -> String {
    let snake = to_snake_case(model);
    if snake.ends_with('s') {
        format!("{snake}es")
    } else {
        format!("{snake}s")
    }
}

#[cfg(test)]
mod tests {
    use super::{to_snake_case, FieldType, ModelDescriptor, RelationKind};

    #[test]
    fn table_and_join_names_follow_snake_case() {
        let user = ModelDescriptor::builder("UserAccount")
            .many_to_many("tags", "Tag")
            .build();
        assert_eq!(user.table(), "user_accounts");

        let relation = user.relation("tags").unwrap();
        assert_eq!(relation.kind, RelationKind::ManyToMany);
        let join = user.join_table(relation).unwrap();
        assert_eq!(join.table, "user_account_tags");
        assert_eq!(join.owner_key, "user_account_id");
        assert_eq!(join.target_key, "tag_id");
    }

    #[test]
    fn explicit_join_table_overrides_default() {
        let tag = ModelDescriptor::builder("Tag")
            .many_to_many_via("posts", "Post", "post_tags")
            .build();
        let join = tag.join_table(tag.relation("posts").unwrap()).unwrap();
        assert_eq!(join.table, "post_tags");
    }

    #[test]
    fn snake_case_and_plural_rules() {
        assert_eq!(to_snake_case("Post"), "post");
        assert_eq!(ModelDescriptor::builder("Address").build().table(), "addresses");
        assert_eq!(FieldType::Timestamp.sql_type(), "INTEGER");
    }
}
