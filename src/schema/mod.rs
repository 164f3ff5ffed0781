//! Table schemas: the data that turns the generic sync engine into a
//! per-table sync.
//!
//! A [`TableSchema`] names the remote API entity, the local relation, the
//! fields to carry across and the business key that identifies a record on
//! both sides. Schemas are defined once at startup in the
//! [`SchemaRegistry`] and only ever borrowed by the engine.

mod registry;

pub use registry::{RegistryError, SchemaRegistry};

use std::fmt;

/// API field carrying the record's creation timestamp.
pub const CREATED_FIELD: &str = "systemCreatedAt";
/// API field carrying the record's last modification timestamp.
pub const MODIFIED_FIELD: &str = "systemModifiedAt";
/// Store column holding [`CREATED_FIELD`].
pub const CREATED_COLUMN: &str = "created_at";
/// Store column holding [`MODIFIED_FIELD`].
pub const MODIFIED_COLUMN: &str = "modified_at";
/// Store-internal surrogate identifier. Never requested from the API.
pub const ID_COLUMN: &str = "id";

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Float => write!(f, "float"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Date => write!(f, "date"),
            FieldType::DateTime => write!(f, "datetime"),
        }
    }
}

/// One field of a table: its API name, its store column and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name as it appears in API records.
    pub name: &'static str,
    /// Column name in the store relation.
    pub column: &'static str,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// Schema of one synced table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Remote API resource name (e.g. `currencies`).
    pub entity: &'static str,
    /// Store relation name (e.g. `currency`).
    pub table: &'static str,
    fields: Vec<FieldDef>,
    business_key: Vec<&'static str>,
    priority: u8,
}

impl TableSchema {
    /// Starts a schema for `entity` stored in `table`.
    pub fn builder(entity: &'static str, table: &'static str) -> TableSchemaBuilder {
        TableSchemaBuilder {
            entity,
            table,
            fields: Vec::new(),
            business_key: Vec::new(),
            priority: 1,
        }
    }

    /// All fields, including the two sync timestamps, in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// API names of the business-key fields, in key order.
    pub fn business_key(&self) -> &[&'static str] {
        &self.business_key
    }

    /// Business-key fields resolved to their definitions.
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.business_key
            .iter()
            .filter_map(move |name| self.field(name))
    }

    /// Run-order priority. Lower values sync first.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Looks up a field by its API name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// API field names to request with `$select`.
    pub fn api_fields(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }
}

/// Builder for [`TableSchema`].
pub struct TableSchemaBuilder {
    entity: &'static str,
    table: &'static str,
    fields: Vec<FieldDef>,
    business_key: Vec<&'static str>,
    priority: u8,
}

impl TableSchemaBuilder {
    /// Adds a non-nullable field that is part of the business key.
    pub fn key(mut self, name: &'static str, column: &'static str, field_type: FieldType) -> Self {
        self.push(name, column, field_type, false);
        self.business_key.push(name);
        self
    }

    /// Adds a nullable field that is part of the business key.
    ///
    /// For keys whose parts may legitimately be blank upstream and are
    /// therefore stored as NULL.
    pub fn optional_key(
        mut self,
        name: &'static str,
        column: &'static str,
        field_type: FieldType,
    ) -> Self {
        self.push(name, column, field_type, true);
        self.business_key.push(name);
        self
    }

    /// Adds a non-nullable field.
    pub fn required(
        mut self,
        name: &'static str,
        column: &'static str,
        field_type: FieldType,
    ) -> Self {
        self.push(name, column, field_type, false);
        self
    }

    /// Adds a nullable field.
    pub fn field(mut self, name: &'static str, column: &'static str, field_type: FieldType) -> Self {
        self.push(name, column, field_type, true);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Appends the sync timestamp fields and finishes the schema.
    pub fn build(mut self) -> TableSchema {
        self.push(CREATED_FIELD, CREATED_COLUMN, FieldType::DateTime, true);
        self.push(MODIFIED_FIELD, MODIFIED_COLUMN, FieldType::DateTime, true);
        TableSchema {
            entity: self.entity,
            table: self.table,
            fields: self.fields,
            business_key: self.business_key,
            priority: self.priority,
        }
    }

    fn push(&mut self, name: &'static str, column: &'static str, field_type: FieldType, nullable: bool) {
        self.fields.push(FieldDef {
            name,
            column,
            field_type,
            nullable,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange_rates() -> TableSchema {
        TableSchema::builder("exchangeRates", "exchange_rate")
            .key("startingDate", "starting_date", FieldType::Date)
            .key("currencyCode", "currency_code", FieldType::Text)
            .field("exchangeRateAmount", "amount", FieldType::Float)
            .priority(2)
            .build()
    }

    #[test]
    fn test_builder_appends_timestamps() {
        let schema = exchange_rates();
        let names = schema.api_fields();
        assert_eq!(
            names,
            vec![
                "startingDate",
                "currencyCode",
                "exchangeRateAmount",
                CREATED_FIELD,
                MODIFIED_FIELD
            ]
        );
        assert_eq!(schema.field(CREATED_FIELD).unwrap().column, CREATED_COLUMN);
    }

    #[test]
    fn test_business_key_order_and_nullability() {
        let schema = exchange_rates();
        assert_eq!(schema.business_key(), &["startingDate", "currencyCode"]);
        assert!(schema.key_fields().all(|f| !f.nullable));
        assert!(schema.field("exchangeRateAmount").unwrap().nullable);
        assert_eq!(schema.priority(), 2);
    }

    #[test]
    fn test_unknown_field_lookup() {
        let schema = exchange_rates();
        assert!(schema.field("nope").is_none());
    }
}
