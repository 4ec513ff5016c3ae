//! Lectern Core - Shared Types
//!
//! Pure data structures shared by the storage, feed and test crates:
//! result records, query descriptors, the error taxonomy and configuration.
//! This crate performs no network or cache I/O.

pub mod config;
pub mod error;
pub mod query;

pub use config::{
    CacheSettings, ConfigError, FeedSettings, LecternConfig, LoggingConfig, StoreConfig,
};
pub use error::{
    CacheError, LecternError, LecternResult, RemoteQueryError, ValidationError,
};
pub use query::{canonical_constraints, Constraint, FieldValue, FilterOperator, QueryDescriptor, Sentinel, SortDirection};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Field data of a remote document, keyed by field name.
pub type Fields = serde_json::Map<String, Value>;

// ============================================================================
// RECORDS
// ============================================================================

/// A single result row from the remote document store.
///
/// The stable document identifier is merged with the document's field data,
/// so a record serializes as `{"id": "...", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable document identifier.
    pub id: String,
    /// Document field data.
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Create a record from an identifier and its field data.
    ///
    /// An `id` key inside `fields` is dropped; the identifier wins.
    pub fn new(id: impl Into<String>, mut fields: Fields) -> Self {
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Create a record with no fields.
    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, Fields::new())
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if name != "id" {
            self.fields.insert(name, value);
        }
        self
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field as a string slice.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get a field as an i64.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }
}
