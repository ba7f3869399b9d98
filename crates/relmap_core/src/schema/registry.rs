//! Schema registry: write-once, read-many model descriptors.
//!
//! # Responsibility
//! - Validate descriptors and merge the standard field set on registration.
//! - Resolve model names to registered descriptors.
//!
//! # Invariants
//! - A model name is registered at most once.
//! - Registered descriptors are never mutated afterwards.
//! - Iteration follows registration order.

use crate::error::{OrmError, OrmResult, ValidationError, ValidationErrorKind};
use crate::model::descriptor::{FieldSpec, FieldType, ModelDescriptor, RelationKind};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Registry of model descriptors.
///
/// Build it single-threaded at startup, then share it read-only.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: Vec<ModelDescriptor>,
    by_name: BTreeMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores one descriptor.
    ///
    /// # Errors
    /// - `DuplicateModel` when the name is taken.
    /// - `Validation` when field constraints or relations are malformed.
    pub fn register(&mut self, descriptor: ModelDescriptor) -> OrmResult<&ModelDescriptor> {
        if self.by_name.contains_key(descriptor.name()) {
            warn!(
                "event=model_register module=schema status=error error_code=duplicate_model model={}",
                descriptor.name()
            );
            return Err(OrmError::DuplicateModel {
                model: descriptor.name().to_string(),
            });
        }

        let merged = merge_field_set(descriptor)?;
        validate_descriptor(&merged)?;

        if let Some(existing) = self.models.iter().find(|model| model.table == merged.table) {
            return Err(ValidationError::new(
                merged.name.clone(),
                ValidationErrorKind::DuplicateTable(existing.table.clone()),
            )
            .into());
        }

        debug!(
            "event=model_register module=schema status=ok model={} table={} fields={} relations={}",
            merged.name,
            merged.table,
            merged.fields.len(),
            merged.relations.len()
        );

        let index = self.models.len();
        self.by_name.insert(merged.name.clone(), index);
        self.models.push(merged);
        Ok(&self.models[index])
    }

    /// Returns the registered descriptor for `name`.
    pub fn lookup(&self, name: &str) -> OrmResult<&ModelDescriptor> {
        self.by_name
            .get(name)
            .map(|index| &self.models[*index])
            .ok_or_else(|| OrmError::UnknownModel {
                model: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered descriptors in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

pub(crate) fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

fn merge_field_set(mut descriptor: ModelDescriptor) -> OrmResult<ModelDescriptor> {
    let Some(field_set) = descriptor.field_set.clone() else {
        return Ok(descriptor);
    };

    for field in &descriptor.fields {
        if field_set.contains(&field.name) {
            return Err(ValidationError::for_field(
                descriptor.name.clone(),
                field.name.clone(),
                ValidationErrorKind::ReservedField,
            )
            .into());
        }
    }

    let mut fields: Vec<FieldSpec> = field_set.fields().to_vec();
    fields.append(&mut descriptor.fields);
    descriptor.fields = fields;
    Ok(descriptor)
}

fn validate_descriptor(descriptor: &ModelDescriptor) -> OrmResult<()> {
    let model = descriptor.name.as_str();
    let invalid = |value: &str| {
        ValidationError::new(model, ValidationErrorKind::InvalidIdentifier(value.to_string()))
    };

    if !is_valid_identifier(model) {
        return Err(invalid(model).into());
    }
    if !is_valid_identifier(&descriptor.table) {
        return Err(invalid(&descriptor.table).into());
    }

    let mut seen = BTreeSet::new();
    let mut primary_keys = 0usize;
    for field in &descriptor.fields {
        let field_error = |kind| ValidationError::for_field(model, field.name.clone(), kind);

        if !is_valid_identifier(&field.name) {
            return Err(invalid(&field.name).into());
        }
        if !seen.insert(field.name.as_str()) {
            return Err(field_error(ValidationErrorKind::DuplicateField).into());
        }

        if field.primary_key {
            primary_keys += 1;
            if primary_keys > 1 {
                return Err(field_error(ValidationErrorKind::MultiplePrimaryKeys).into());
            }
            if field.field_type != FieldType::Integer || field.nullable {
                return Err(field_error(ValidationErrorKind::InvalidPrimaryKey).into());
            }
        }

        if let Some(default) = &field.default {
            let fits = if default.is_null() {
                field.nullable
            } else {
                default.fits(field.field_type)
            };
            if !fits || field.primary_key {
                return Err(field_error(ValidationErrorKind::InvalidDefault).into());
            }
        }

        if let Some(target) = &field.foreign_key_of {
            if field.field_type != FieldType::Integer || !is_valid_identifier(target) {
                return Err(field_error(ValidationErrorKind::InvalidForeignKey).into());
            }
        }
    }

    if primary_keys == 0 {
        return Err(ValidationError::new(model, ValidationErrorKind::MissingPrimaryKey).into());
    }

    let mut relation_names = BTreeSet::new();
    for relation in &descriptor.relations {
        let relation_error =
            |kind| ValidationError::for_field(model, relation.name.clone(), kind);

        if !is_valid_identifier(&relation.name) {
            return Err(invalid(&relation.name).into());
        }
        if seen.contains(relation.name.as_str()) || !relation_names.insert(relation.name.as_str())
        {
            return Err(relation_error(ValidationErrorKind::DuplicateRelation).into());
        }
        if !is_valid_identifier(&relation.target) {
            return Err(invalid(&relation.target).into());
        }

        match relation.kind {
            RelationKind::OneToOne | RelationKind::OneToMany => match &relation.foreign_key {
                Some(column) if is_valid_identifier(column) => {}
                Some(column) => return Err(invalid(column).into()),
                None => {
                    return Err(relation_error(ValidationErrorKind::IncompleteRelation(
                        "missing foreign key column",
                    ))
                    .into())
                }
            },
            RelationKind::ManyToMany => {
                let join = descriptor.join_table(relation).ok_or_else(|| {
                    relation_error(ValidationErrorKind::IncompleteRelation("missing join table"))
                })?;
                if !is_valid_identifier(&join.table) {
                    return Err(invalid(&join.table).into());
                }
                if join.owner_key == join.target_key {
                    return Err(relation_error(ValidationErrorKind::IncompleteRelation(
                        "self-referencing join needs distinct key columns",
                    ))
                    .into());
                }
            }
        }
    }

    Ok(())
}
