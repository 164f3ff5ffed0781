use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::query_builder::Separated;
use sqlx::{QueryBuilder, Sqlite};

use super::StoreError;
use crate::api::format_timestamp;
use crate::schema::{FieldDef, FieldType};

/// A record value converted to its column's storage type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
}

impl SqlValue {
    /// Converts an API value for `field`.
    ///
    /// Empty and whitespace-only strings become NULL for every type.
    pub fn convert(field: &FieldDef, value: &Value) -> Result<Self, StoreError> {
        let value = match value {
            Value::Null => return Ok(SqlValue::Null),
            Value::String(s) if s.trim().is_empty() => return Ok(SqlValue::Null),
            other => other,
        };

        let converted = match field.field_type {
            FieldType::Text => match value {
                Value::String(s) => Some(SqlValue::Text(s.clone())),
                Value::Number(_) | Value::Bool(_) => Some(SqlValue::Text(value.to_string())),
                _ => None,
            },
            FieldType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(whole_i64))
                    .map(SqlValue::Integer),
                Value::String(s) => s.trim().parse().ok().map(SqlValue::Integer),
                Value::Bool(b) => Some(SqlValue::Integer(*b as i64)),
                _ => None,
            },
            FieldType::Float => match value {
                Value::Number(n) => n.as_f64().map(SqlValue::Float),
                Value::String(s) => s.trim().parse().ok().map(SqlValue::Float),
                _ => None,
            },
            FieldType::Boolean => match value {
                Value::Bool(b) => Some(SqlValue::Integer(*b as i64)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(SqlValue::Integer(0)),
                    Some(1) => Some(SqlValue::Integer(1)),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(SqlValue::Integer(1)),
                    "false" => Some(SqlValue::Integer(0)),
                    _ => None,
                },
                _ => None,
            },
            FieldType::Date => match value {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .map(|d| SqlValue::Text(d.format("%Y-%m-%d").to_string())),
                _ => None,
            },
            FieldType::DateTime => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|ts| SqlValue::Text(format_timestamp(&ts.with_timezone(&Utc)))),
                _ => None,
            },
        };

        converted.ok_or_else(|| StoreError::Conversion {
            field: field.name.to_string(),
            field_type: field.field_type,
            value: value.to_string(),
        })
    }

    /// Binds this value as the next parameter of `builder`.
    pub fn push_bind(self, builder: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            SqlValue::Null => builder.push_bind(None::<String>),
            SqlValue::Text(s) => builder.push_bind(s),
            SqlValue::Integer(i) => builder.push_bind(i),
            SqlValue::Float(f) => builder.push_bind(f),
        };
    }

    /// Binds this value as the next item of a separated list.
    pub fn push_bind_separated(self, separated: &mut Separated<'_, '_, Sqlite, &'static str>) {
        match self {
            SqlValue::Null => separated.push_bind(None::<String>),
            SqlValue::Text(s) => separated.push_bind(s),
            SqlValue::Integer(i) => separated.push_bind(i),
            SqlValue::Float(f) => separated.push_bind(f),
        };
    }
}

/// `f` as an `i64` when it is a whole number inside the `i64` range.
fn whole_i64(f: f64) -> Option<i64> {
    // i64::MAX rounds up to 2^63 as f64, hence the strict upper bound.
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
