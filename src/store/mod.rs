//! Document persistence for per-user collections.
//
// Every document lives under a collection path such as `users/{uid}/events`.
// Writes are queued in a `WriteBatch` and applied together by
// `DocumentStore::commit`: either every queued write lands or none does.

mod firestore;
mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, TimeZone};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const USERS: &str = "users";
pub const SUBJECTS: &str = "subjects";
pub const EVENTS: &str = "events";
pub const RECOMMENDATIONS: &str = "recommendations";

pub type Fields = BTreeMap<String, FieldValue>;

/// Typed document field, mirroring the value kinds the document database stores
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<FixedOffset>),
    Array(Vec<FieldValue>),
    Map(Fields),
}

impl FieldValue {
    /// Store a timezone-aware instant, keeping its original offset
    pub fn timestamp<Tz: TimeZone>(instant: &DateTime<Tz>) -> Self {
        let offset = instant.offset().fix();
        FieldValue::Timestamp(instant.with_timezone(&offset))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            FieldValue::Map(fields) => Some(fields),
            _ => None,
        }
    }

    /// Plain JSON view of the value; timestamps become RFC 3339 strings
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Integer(i) => Value::Number((*i).into()),
            FieldValue::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            FieldValue::Array(values) => Value::Array(values.iter().map(FieldValue::to_json).collect()),
            FieldValue::Map(fields) => Value::Object(fields_to_json(fields)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

pub fn fields_to_json(fields: &Fields) -> Map<String, Value> {
    fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// Path of a collection owned by one user, e.g. `users/abc/subjects`
pub fn user_collection(user_id: &str, collection: &str) -> String {
    format!("{}/{}/{}", USERS, user_id, collection)
}

/// Generate a fresh document id without a round trip to the store
pub fn generate_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A document creation waiting for the next commit
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub collection: String,
    pub document_id: String,
    pub fields: Fields,
    /// Fields the store fills with its own commit time
    pub server_timestamps: Vec<String>,
}

#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<PendingWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, collection: &str, document_id: &str, fields: Fields) {
        self.writes.push(PendingWrite {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            fields,
            server_timestamps: Vec::new(),
        });
    }

    pub fn create_with_server_timestamp(
        &mut self,
        collection: &str,
        document_id: &str,
        fields: Fields,
        timestamp_field: &str,
    ) {
        self.writes.push(PendingWrite {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            fields,
            server_timestamps: vec![timestamp_field.to_string()],
        });
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<PendingWrite> {
        self.writes
    }
}

/// Equality filter used by `DocumentStore::find_first`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: FieldValue,
}

impl FieldFilter {
    pub fn equals(field: &str, value: impl Into<FieldValue>) -> Self {
        Self { field: field.to_string(), value: value.into() }
    }

    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field) == Some(&self.value)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read every document of a collection
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// First document of a collection matching all filters
    async fn find_first(&self, collection: &str, filters: &[FieldFilter])
        -> Result<Option<Document>>;

    /// Reserve an id for a document that will be created in a later commit
    fn new_document_id(&self) -> String {
        generate_document_id()
    }

    /// Apply every queued write atomically
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
