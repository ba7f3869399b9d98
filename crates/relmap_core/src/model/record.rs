//! Record instances exchanged between callers and the mapper.
//!
//! # Invariants
//! - The primary key is kept outside the field map.
//! - A key of `None` or `0` marks a record that was never persisted.
//! - The engine never keeps a record after an operation returns.

use crate::model::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name to value mapping used for partial updates.
pub type FieldMap = BTreeMap<String, Value>;

/// Relations loaded eagerly alongside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedRecords {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// One row of a registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    model: String,
    key: Option<i64>,
    fields: FieldMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    related: BTreeMap<String, RelatedRecords>,
}

impl Record {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            key: None,
            fields: FieldMap::new(),
            related: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn key(&self) -> Option<i64> {
        self.key.filter(|key| *key != 0)
    }

    pub fn is_new(&self) -> bool {
        self.key().is_none()
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Eagerly loaded relation, if it was requested.
    pub fn related(&self, relation: &str) -> Option<&RelatedRecords> {
        self.related.get(relation)
    }

    /// Whether the soft-delete marker is set.
    pub fn is_deleted(&self) -> bool {
        self.fields
            .get(crate::model::descriptor::DELETED_AT_FIELD)
            .is_some_and(|value| !value.is_null())
    }

    pub(crate) fn assign_key(&mut self, key: i64) {
        self.key = Some(key);
    }

    pub(crate) fn from_parts(model: &str, key: i64, fields: FieldMap) -> Self {
        Self {
            model: model.to_string(),
            key: Some(key),
            fields,
            related: BTreeMap::new(),
        }
    }

    pub(crate) fn attach_related(&mut self, relation: &str, records: RelatedRecords) {
        self.related.insert(relation.to_string(), records);
    }
}
