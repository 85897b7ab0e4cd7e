//! Object id resolution.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

/// The external identifier of a document in a remote index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Converts a JSON value into an object id.
    ///
    /// Returns `None` for `null` and for blank strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(Self(s.clone())),
            other => Some(Self(other.to_string())),
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Function deriving an object id value from a record.
pub type IdFn<R> = Arc<dyn Fn(&R) -> Option<Value> + Send + Sync>;

/// How a model derives the object id of its documents.
pub enum IdStrategy<R> {
    /// The record's native primary key.
    Native,
    /// The value of a named field.
    Field(String),
    /// A function of the record.
    Computed(IdFn<R>),
}

impl<R> IdStrategy<R> {
    /// Uses a named field as the object id.
    pub fn field(name: impl Into<String>) -> Self {
        IdStrategy::Field(name.into())
    }

    /// Uses a function of the record as the object id.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&R) -> Option<Value> + Send + Sync + 'static,
    {
        IdStrategy::Computed(Arc::new(f))
    }

    /// The stored field the id comes from, for change tracking.
    ///
    /// Computed ids report no field and are never considered changed.
    pub fn tracked_field(&self) -> Option<&str> {
        match self {
            IdStrategy::Field(name) => Some(name),
            IdStrategy::Native | IdStrategy::Computed(_) => None,
        }
    }
}

impl<R: Record> IdStrategy<R> {
    /// Resolves the object id of a record.
    ///
    /// `None` means the record cannot be indexed anywhere.
    pub fn resolve(&self, record: &R) -> Option<ObjectId> {
        let value = match self {
            IdStrategy::Native => record.primary_key(),
            IdStrategy::Field(name) => record.field(name),
            IdStrategy::Computed(f) => f(record),
        };
        value.as_ref().and_then(ObjectId::from_value)
    }
}

impl<R> Default for IdStrategy<R> {
    fn default() -> Self {
        IdStrategy::Native
    }
}

impl<R> Clone for IdStrategy<R> {
    fn clone(&self) -> Self {
        match self {
            IdStrategy::Native => IdStrategy::Native,
            IdStrategy::Field(name) => IdStrategy::Field(name.clone()),
            IdStrategy::Computed(f) => IdStrategy::Computed(Arc::clone(f)),
        }
    }
}

impl<R> fmt::Debug for IdStrategy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdStrategy::Native => f.write_str("Native"),
            IdStrategy::Field(name) => f.debug_tuple("Field").field(name).finish(),
            IdStrategy::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}
