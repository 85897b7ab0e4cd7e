//! Record abstraction.
//!
//! The engine never talks to the persistence layer directly. Everything it
//! needs from a stored record goes through the [`Record`] trait: the model
//! type, the native primary key, field lookup, the stored attribute set, and
//! the framework's per-field change flags.
//!
//! [`MemoryRecord`] is a JSON-backed implementation that keeps a committed
//! snapshot to derive change flags, which is what most persistence
//! frameworks expose.

use serde_json::{Map, Value};

/// A record stored in the application's persistence layer.
pub trait Record: Send + Sync {
    /// The model type name (e.g. `"Color"`).
    fn model_type(&self) -> &str;

    /// The record's native primary key, if it has one.
    fn primary_key(&self) -> Option<Value>;

    /// Returns the value of a stored or transient field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Returns all stored attributes, excluding the primary key and any
    /// transient (non-persisted) fields.
    fn attributes(&self) -> Map<String, Value>;

    /// The framework's change flag for a field.
    ///
    /// `Some(changed)` when the framework tracks the field, `None` when it
    /// has no flag for it (computed or transient fields).
    fn field_changed(&self, _name: &str) -> Option<bool> {
        None
    }

    /// Whether the record has been written to the persistence layer.
    fn is_persisted(&self) -> bool {
        true
    }
}

/// A JSON-backed record with snapshot-based change tracking.
///
/// # Example
///
/// ```
/// use index_sync::record::{MemoryRecord, Record};
/// use serde_json::json;
///
/// let mut color = MemoryRecord::new("Color")
///     .with_field("name", json!("blue"))
///     .with_field("hex", json!(0));
/// assert!(!color.is_persisted());
///
/// color.save(1);
/// assert_eq!(color.field_changed("name"), Some(false));
///
/// color.set("name", json!("red"));
/// assert_eq!(color.field_changed("name"), Some(true));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    model_type: String,
    id: Option<Value>,
    fields: Map<String, Value>,
    committed: Map<String, Value>,
    transient: Map<String, Value>,
    persisted: bool,
}

impl MemoryRecord {
    /// Creates a new, unsaved record of the given model type.
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            id: None,
            fields: Map::new(),
            committed: Map::new(),
            transient: Map::new(),
            persisted: false,
        }
    }

    /// Sets a stored field (builder form).
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Sets a transient field (builder form).
    pub fn with_transient(mut self, name: impl Into<String>, value: Value) -> Self {
        self.transient.insert(name.into(), value);
        self
    }

    /// Sets a stored field.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Sets a transient field. Transient fields are never part of the stored
    /// attribute set and carry no change flag.
    pub fn set_transient(&mut self, name: impl Into<String>, value: Value) {
        self.transient.insert(name.into(), value);
    }

    /// Assigns the primary key and commits the current field values.
    pub fn save(&mut self, id: impl Into<Value>) {
        self.id = Some(id.into());
        self.persisted = true;
        self.commit();
    }

    /// Commits the current field values; all change flags reset.
    pub fn commit(&mut self) {
        self.committed = self.fields.clone();
    }

    /// Marks the record as removed from the persistence layer.
    pub fn mark_destroyed(&mut self) {
        self.persisted = false;
    }

    /// Returns the primary key as a string, if any.
    pub fn id_string(&self) -> Option<String> {
        self.id.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl Record for MemoryRecord {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn primary_key(&self) -> Option<Value> {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return self.id.clone();
        }
        self.fields
            .get(name)
            .or_else(|| self.transient.get(name))
            .cloned()
    }

    fn attributes(&self) -> Map<String, Value> {
        self.fields.clone()
    }

    fn field_changed(&self, name: &str) -> Option<bool> {
        if name == "id" {
            return Some(false);
        }
        if self.transient.contains_key(name) && !self.fields.contains_key(name) {
            return None;
        }
        if !self.fields.contains_key(name) && !self.committed.contains_key(name) {
            return None;
        }
        Some(self.fields.get(name) != self.committed.get(name))
    }

    fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// Returns whether a JSON value counts as "true" for a condition.
///
/// Only `null` and `false` are falsy.
pub fn truthy(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}

/// Returns whether a JSON value is blank: null, empty string/array/object.
pub fn blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_is_not_persisted() {
        let record = MemoryRecord::new("Color").with_field("name", json!("blue"));
        assert!(!record.is_persisted());
        assert!(record.primary_key().is_none());
        assert_eq!(record.field("name"), Some(json!("blue")));
    }

    #[test]
    fn test_change_flags_follow_commit() {
        let mut record = MemoryRecord::new("Color").with_field("name", json!("blue"));
        // uncommitted new field counts as changed
        assert_eq!(record.field_changed("name"), Some(true));

        record.save(7);
        assert_eq!(record.field_changed("name"), Some(false));
        assert_eq!(record.id_string().as_deref(), Some("7"));

        record.set("name", json!("red"));
        assert_eq!(record.field_changed("name"), Some(true));

        record.commit();
        assert_eq!(record.field_changed("name"), Some(false));
    }

    #[test]
    fn test_transient_fields_have_no_flag() {
        let mut record = MemoryRecord::new("Color");
        record.set_transient("not_indexed", json!("strstr"));
        assert_eq!(record.field_changed("not_indexed"), None);
        assert_eq!(record.field("not_indexed"), Some(json!("strstr")));
        assert!(!record.attributes().contains_key("not_indexed"));
    }

    #[test]
    fn test_unknown_field_has_no_flag() {
        let record = MemoryRecord::new("Color");
        assert_eq!(record.field_changed("nb_children"), None);
    }

    #[test]
    fn test_truthy_and_blank() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&Value::Null)));
        assert!(!truthy(Some(&json!(false))));
        assert!(truthy(Some(&json!(0))));
        assert!(truthy(Some(&json!(""))));

        assert!(blank(Some(&json!("  "))));
        assert!(blank(Some(&json!([]))));
        assert!(!blank(Some(&json!("google"))));
    }
}
