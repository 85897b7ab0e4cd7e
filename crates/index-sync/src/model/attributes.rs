//! Record-to-document mapping.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::record::Record;
use crate::sanitize::HtmlSanitizer;

/// Reserved document field holding tags.
pub const TAGS_FIELD: &str = "_tags";

/// Reserved document field holding the geolocation point(s).
pub const GEOLOC_FIELD: &str = "_geoloc";

/// Document field holding the object id.
pub const OBJECT_ID_FIELD: &str = "objectID";

/// A plain document sent to the remote index.
pub type Document = Map<String, Value>;

/// Value produced by a computed attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A JSON value.
    Json(Value),
    /// Raw bytes of unknown encoding.
    Bytes(Vec<u8>),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        FieldValue::Bytes(bytes)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Json(Value::String(s.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Json(Value::String(s))
    }
}

/// Function computing an attribute value from a record.
pub type ComputeFn<R> = Arc<dyn Fn(&R) -> FieldValue + Send + Sync>;

/// Where an attribute value comes from.
pub enum AttributeSource<R> {
    /// A stored record field.
    Field(String),
    /// A function of the record, with the stored fields it reads.
    ///
    /// An empty dependency list means the attribute cannot be change-tracked.
    Computed {
        /// The function.
        compute: ComputeFn<R>,
        /// Stored fields the function reads.
        depends_on: Vec<String>,
    },
}

impl<R> Clone for AttributeSource<R> {
    fn clone(&self) -> Self {
        match self {
            AttributeSource::Field(name) => AttributeSource::Field(name.clone()),
            AttributeSource::Computed {
                compute,
                depends_on,
            } => AttributeSource::Computed {
                compute: Arc::clone(compute),
                depends_on: depends_on.clone(),
            },
        }
    }
}

/// One declared output field.
pub struct Attribute<R> {
    /// Output field name.
    pub name: String,
    /// Value source.
    pub source: AttributeSource<R>,
}

impl<R> Clone for Attribute<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }
}

impl<R> fmt::Debug for Attribute<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            AttributeSource::Field(field) => format!("field({field})"),
            AttributeSource::Computed { depends_on, .. } => {
                format!("computed({})", depends_on.join(", "))
            }
        };
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("source", &source)
            .finish()
    }
}

/// A serializer that fully replaces per-attribute mapping.
pub trait Serializer<R>: Send + Sync {
    /// Serializes the record into the fields it exposes.
    fn serialize(&self, record: &R) -> Map<String, Value>;

    /// Stored fields the serializer reads. Empty means "unknown", which
    /// makes every update dirty under field-set diffing.
    fn fields(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Source of the `_tags` field.
pub enum TagSource<R> {
    /// A constant list of tags.
    Static(Vec<String>),
    /// A function of the record, with the stored fields it reads.
    Computed {
        /// The function.
        compute: Arc<dyn Fn(&R) -> Vec<String> + Send + Sync>,
        /// Stored fields the function reads.
        depends_on: Vec<String>,
    },
}

/// Source of the `_geoloc` field, with the stored fields it reads.
pub struct GeolocSource<R> {
    /// Returns the geolocation point(s), or `None` to omit the field.
    pub compute: Arc<dyn Fn(&R) -> Option<Value> + Send + Sync>,
    /// Stored fields the function reads.
    pub depends_on: Vec<String>,
}

/// Converts records into documents.
pub struct AttributeMapper<R> {
    pub(crate) attributes: Vec<Attribute<R>>,
    pub(crate) additional: Vec<Attribute<R>>,
    pub(crate) serializer: Option<Arc<dyn Serializer<R>>>,
    pub(crate) tags: Option<TagSource<R>>,
    pub(crate) geoloc: Option<GeolocSource<R>>,
    pub(crate) sanitizer: Option<HtmlSanitizer>,
    pub(crate) force_utf8: bool,
}

impl<R> AttributeMapper<R> {
    /// Whether the document is built from the record's stored attributes.
    pub fn uses_stored_attributes(&self) -> bool {
        self.serializer.is_none() && self.attributes.is_empty()
    }
}

impl<R: Record> AttributeMapper<R> {
    /// Maps a record into a document (without the object id).
    pub fn map(&self, record: &R) -> Document {
        let mut document = if let Some(serializer) = &self.serializer {
            serializer.serialize(record)
        } else if self.attributes.is_empty() {
            record.attributes()
        } else {
            self.evaluate_all(&self.attributes, record)
        };

        if self.serializer.is_none() {
            let additional = self.evaluate_all(&self.additional, record);
            document.extend(additional);
        }

        if let Some(tags) = &self.tags {
            let tags = match tags {
                TagSource::Static(tags) => tags.clone(),
                TagSource::Computed { compute, .. } => compute(record),
            };
            document.insert(
                TAGS_FIELD.to_string(),
                Value::Array(tags.into_iter().map(Value::String).collect()),
            );
        }

        match &self.geoloc {
            Some(geoloc) => {
                if let Some(point) = (geoloc.compute)(record) {
                    document.insert(GEOLOC_FIELD.to_string(), point);
                }
            }
            None => {
                if let Some(point) = default_geoloc(&document) {
                    document.insert(GEOLOC_FIELD.to_string(), point);
                }
            }
        }

        match &self.sanitizer {
            Some(sanitizer) => document
                .into_iter()
                .map(|(k, v)| (k, sanitizer.clean_value(v)))
                .collect(),
            None => document,
        }
    }

    fn evaluate_all(&self, attributes: &[Attribute<R>], record: &R) -> Document {
        attributes
            .iter()
            .map(|attribute| {
                let value = match &attribute.source {
                    AttributeSource::Field(field) => record.field(field).unwrap_or(Value::Null),
                    AttributeSource::Computed { compute, .. } => self.encode(compute(record)),
                };
                (attribute.name.clone(), value)
            })
            .collect()
    }

    fn encode(&self, value: FieldValue) -> Value {
        match value {
            FieldValue::Json(value) => value,
            FieldValue::Bytes(bytes) if self.force_utf8 => {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            FieldValue::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        }
    }
}

fn default_geoloc(document: &Document) -> Option<Value> {
    if document.contains_key(GEOLOC_FIELD) {
        return None;
    }
    let lat = ["lat", "latitude"]
        .iter()
        .find_map(|k| document.get(*k).filter(|v| v.is_number()))?;
    let lng = ["lng", "lon", "longitude"]
        .iter()
        .find_map(|k| document.get(*k).filter(|v| v.is_number()))?;
    Some(serde_json::json!({ "lat": lat, "lng": lng }))
}

impl<R> fmt::Debug for AttributeMapper<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeMapper")
            .field("attributes", &self.attributes)
            .field("additional", &self.additional)
            .field("serializer", &self.serializer.is_some())
            .field("tags", &self.tags.is_some())
            .field("geoloc", &self.geoloc.is_some())
            .field("sanitize", &self.sanitizer.is_some())
            .field("force_utf8", &self.force_utf8)
            .finish()
    }
}
