use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Revision marker the API attaches to every record. Never persisted.
pub const TRANSPORT_TAG: &str = "@odata.etag";

/// One remote row: an ordered mapping of API field name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

/// A record lacks one of its table's business-key fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Record is missing business key field '{field}'")]
pub struct MissingKeyField {
    pub field: String,
}

/// Combined business-key value of a record.
///
/// Blank strings and JSON null are the same key part, since both are
/// persisted as NULL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusinessKey(Vec<Option<String>>);

impl BusinessKey {
    pub fn parts(&self) -> &[Option<String>] {
        &self.0
    }
}

impl std::fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|p| p.as_deref().unwrap_or("<null>"))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Removes the API revision tag. Returns true if one was present.
    pub fn strip_transport_tag(&mut self) -> bool {
        self.0.remove(TRANSPORT_TAG).is_some()
    }

    /// Extracts the business key for `fields`, in order.
    pub fn business_key(&self, fields: &[&str]) -> Result<BusinessKey, MissingKeyField> {
        fields
            .iter()
            .map(|field| {
                self.0
                    .get(*field)
                    .map(key_part)
                    .ok_or_else(|| MissingKeyField {
                        field: field.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(BusinessKey)
    }
}

fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Delta fetched for one table: records to insert and records to update.
///
/// After reconciliation the business keys of the two lists are disjoint.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub inserts: Vec<Record>,
    pub updates: Vec<Record>,
}

impl RecordSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}
