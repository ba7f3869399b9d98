//! Dynamic field values and their SQLite conversions.
//!
//! # Invariants
//! - `Boolean` columns are stored as `0`/`1` integers and always decode back
//!   to `Value::Bool`.
//! - `Timestamp` values are epoch milliseconds stored as integers.

use crate::model::descriptor::FieldType;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One field value of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Short type label used in validation messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    /// Whether a non-null value can be stored in a column of `field_type`.
    ///
    /// `Null` fits every type; nullability is checked separately.
    pub fn fits(&self, field_type: FieldType) -> bool {
        match (self, field_type) {
            (Self::Null, _) => true,
            (Self::Bool(_), FieldType::Boolean) => true,
            (Self::Integer(_), FieldType::Integer | FieldType::Timestamp | FieldType::Real) => {
                true
            }
            (Self::Real(_), FieldType::Real) => true,
            (Self::Text(_), FieldType::Text) => true,
            (Self::Blob(_), FieldType::Blob) => true,
            _ => false,
        }
    }

    /// Decodes one column cell using the declared field type.
    pub(crate) fn from_column(field_type: FieldType, cell: ValueRef<'_>) -> Result<Self, String> {
        match (field_type, cell) {
            (_, ValueRef::Null) => Ok(Self::Null),
            (FieldType::Boolean, ValueRef::Integer(0)) => Ok(Self::Bool(false)),
            (FieldType::Boolean, ValueRef::Integer(1)) => Ok(Self::Bool(true)),
            (FieldType::Integer | FieldType::Timestamp, ValueRef::Integer(value)) => {
                Ok(Self::Integer(value))
            }
            (FieldType::Real, ValueRef::Real(value)) => Ok(Self::Real(value)),
            (FieldType::Real, ValueRef::Integer(value)) => Ok(Self::Real(value as f64)),
            (FieldType::Text, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
                .map(|text| Self::Text(text.to_string()))
                .map_err(|err| format!("non-utf8 text: {err}")),
            (FieldType::Blob, ValueRef::Blob(bytes)) => Ok(Self::Blob(bytes.to_vec())),
            (expected, other) => Err(format!(
                "{:?} cell cannot be read as {expected}",
                other.data_type()
            )),
        }
    }

    /// Renders the value as an SQL literal for DDL defaults.
    pub(crate) fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(value) => i64::from(*value).to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => format!("{value:?}"),
            Self::Text(value) => format!("'{}'", value.replace('\'', "''")),
            Self::Blob(bytes) => {
                let mut literal = String::with_capacity(bytes.len() * 2 + 3);
                literal.push_str("X'");
                for byte in bytes {
                    let _ = write!(literal, "{byte:02X}");
                }
                literal.push('\'');
                literal
            }
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Bool(value) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*value))),
            Self::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value.as_slice())),
        })
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use crate::model::descriptor::FieldType;
    use rusqlite::types::ValueRef;

    #[test]
    fn integer_fits_numeric_and_timestamp_columns() {
        assert!(Value::Integer(3).fits(FieldType::Integer));
        assert!(Value::Integer(3).fits(FieldType::Timestamp));
        assert!(Value::Integer(3).fits(FieldType::Real));
        assert!(!Value::Integer(3).fits(FieldType::Text));
        assert!(Value::Null.fits(FieldType::Blob));
    }

    #[test]
    fn boolean_cells_reject_values_other_than_zero_and_one() {
        assert_eq!(
            Value::from_column(FieldType::Boolean, ValueRef::Integer(1)).unwrap(),
            Value::Bool(true)
        );
        assert!(Value::from_column(FieldType::Boolean, ValueRef::Integer(7)).is_err());
    }

    #[test]
    fn text_literal_escapes_quotes() {
        assert_eq!(Value::from("it's").to_sql_literal(), "'it''s'");
        assert_eq!(Value::Blob(vec![0x0a, 0xff]).to_sql_literal(), "X'0AFF'");
    }

    #[test]
    fn option_none_converts_to_null() {
        let value: Value = Option::<&str>::None.into();
        assert!(value.is_null());
    }
}
