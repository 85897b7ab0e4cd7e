//! Dirty-state detection.
//!
//! A model picks a [`DirtyStrategy`]. Under [`DirtyStrategy::FieldDiff`] the
//! tracker consults a per-field capability table that is resolved once when
//! the model is built: every field the document depends on maps to a
//! [`ChangeDetection`] entry saying how its change flag is obtained.
//!
//! Fields whose change cannot be observed count as always dirty.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::model::attributes::{
    AttributeMapper, AttributeSource, GEOLOC_FIELD, TAGS_FIELD, TagSource,
};
use crate::record::Record;

/// Function answering "did this part of the document change?".
pub type ChangeFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// How a model decides whether a record must be re-sent.
pub enum DirtyStrategy<R> {
    /// Every create and update is dirty.
    Always,
    /// Dirty when a tracked field's change flag is set.
    FieldDiff,
    /// A model-supplied predicate is the final word, even on create.
    Custom(ChangeFn<R>),
}

impl<R> DirtyStrategy<R> {
    /// Wraps a custom dirty predicate.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        DirtyStrategy::Custom(Arc::new(f))
    }
}

impl<R> Default for DirtyStrategy<R> {
    fn default() -> Self {
        DirtyStrategy::FieldDiff
    }
}

/// How the change of one tracked field is detected.
pub enum ChangeDetection<R> {
    /// Ask the record for its framework change flag.
    Detectable,
    /// No flag exists; the field is always considered changed.
    NotDetectable,
    /// A model-supplied override answers for this field.
    Custom(ChangeFn<R>),
}

impl<R> ChangeDetection<R> {
    /// Override answering with a function of the record.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        ChangeDetection::Custom(Arc::new(f))
    }
}

impl<R: 'static> ChangeDetection<R> {
    /// Override that reports the field as never changed.
    pub fn never() -> Self {
        ChangeDetection::custom(|_: &R| false)
    }
}

impl<R> Clone for ChangeDetection<R> {
    fn clone(&self) -> Self {
        match self {
            ChangeDetection::Detectable => ChangeDetection::Detectable,
            ChangeDetection::NotDetectable => ChangeDetection::NotDetectable,
            ChangeDetection::Custom(f) => ChangeDetection::Custom(Arc::clone(f)),
        }
    }
}

impl<R> fmt::Debug for ChangeDetection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeDetection::Detectable => f.write_str("Detectable"),
            ChangeDetection::NotDetectable => f.write_str("NotDetectable"),
            ChangeDetection::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

struct TrackedField<R> {
    name: String,
    detection: ChangeDetection<R>,
}

impl<R> fmt::Debug for TrackedField<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.name, self.detection)
    }
}

/// Decides whether a record's document changed since the last sync.
pub struct DirtyTracker<R> {
    strategy: DirtyStrategy<R>,
    fields: Vec<TrackedField<R>>,
    stored_attributes: bool,
    overrides: HashMap<String, ChangeDetection<R>>,
}

impl<R> DirtyTracker<R> {
    /// Resolves the capability table for a model.
    ///
    /// `extra_fields` are stored fields read outside the document (the id
    /// field and field-based conditions).
    pub(crate) fn resolve(
        strategy: DirtyStrategy<R>,
        overrides: HashMap<String, ChangeDetection<R>>,
        mapper: &AttributeMapper<R>,
        extra_fields: Vec<String>,
    ) -> Self {
        let mut tracker = Self {
            strategy,
            fields: Vec::new(),
            stored_attributes: mapper.uses_stored_attributes(),
            overrides,
        };

        if let Some(serializer) = &mapper.serializer {
            let fields = serializer.fields();
            if fields.is_empty() {
                tracker.push("<serializer>", ChangeDetection::NotDetectable);
            }
            for field in fields {
                tracker.push_field(&field);
            }
        } else {
            for attribute in mapper.attributes.iter().chain(&mapper.additional) {
                tracker.push_source(&attribute.name, &attribute.source);
            }
        }

        match &mapper.tags {
            Some(TagSource::Computed { depends_on, .. }) => {
                tracker.push_derived(TAGS_FIELD, depends_on)
            }
            Some(TagSource::Static(_)) | None => {}
        }
        if let Some(geoloc) = &mapper.geoloc {
            tracker.push_derived(GEOLOC_FIELD, &geoloc.depends_on);
        }

        for field in extra_fields {
            tracker.push_field(&field);
        }
        tracker
    }

    fn push(&mut self, name: &str, detection: ChangeDetection<R>) {
        if self.fields.iter().any(|f| f.name == name) {
            return;
        }
        self.fields.push(TrackedField {
            name: name.to_string(),
            detection,
        });
    }

    fn push_field(&mut self, field: &str) {
        let detection = self
            .overrides
            .get(field)
            .cloned()
            .unwrap_or(ChangeDetection::Detectable);
        self.push(field, detection);
    }

    fn push_source(&mut self, name: &str, source: &AttributeSource<R>) {
        if let Some(detection) = self.overrides.get(name).cloned() {
            self.push(name, detection);
            return;
        }
        match source {
            AttributeSource::Field(field) => self.push_field(field),
            AttributeSource::Computed { depends_on, .. } => self.push_derived(name, depends_on),
        }
    }

    fn push_derived(&mut self, name: &str, depends_on: &[String]) {
        if let Some(detection) = self.overrides.get(name).cloned() {
            self.push(name, detection);
        } else if depends_on.is_empty() {
            self.push(name, ChangeDetection::NotDetectable);
        } else {
            for field in depends_on {
                self.push_field(field);
            }
        }
    }

    /// Names of the fields in the resolved capability table.
    pub fn tracked_fields(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

impl<R: Record> DirtyTracker<R> {
    /// Returns whether the record must be re-sent.
    ///
    /// `previous` is `None` for a create.
    pub fn must_reindex(&self, previous: Option<&R>, current: &R) -> bool {
        match &self.strategy {
            DirtyStrategy::Custom(f) => f(current),
            DirtyStrategy::Always => true,
            DirtyStrategy::FieldDiff => previous.is_none() || self.any_field_changed(current),
        }
    }

    fn any_field_changed(&self, current: &R) -> bool {
        let declared = self
            .fields
            .iter()
            .find(|field| changed(&field.name, &field.detection, current));
        if let Some(field) = declared {
            trace!(field = %field.name, "tracked field changed");
            return true;
        }

        if self.stored_attributes {
            for name in current.attributes().keys() {
                let detection = self
                    .overrides
                    .get(name)
                    .unwrap_or(&ChangeDetection::Detectable);
                if changed(name, detection, current) {
                    trace!(field = %name, "stored attribute changed");
                    return true;
                }
            }
        }
        false
    }
}

fn changed<R: Record>(name: &str, detection: &ChangeDetection<R>, record: &R) -> bool {
    match detection {
        ChangeDetection::Detectable => record.field_changed(name).unwrap_or(true),
        ChangeDetection::NotDetectable => true,
        ChangeDetection::Custom(f) => f(record),
    }
}

impl<R> fmt::Debug for DirtyTracker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match self.strategy {
            DirtyStrategy::Always => "always",
            DirtyStrategy::FieldDiff => "field-diff",
            DirtyStrategy::Custom(_) => "custom",
        };
        f.debug_struct("DirtyTracker")
            .field("strategy", &strategy)
            .field("fields", &self.fields)
            .field("stored_attributes", &self.stored_attributes)
            .finish()
    }
}

/// Dirty state of one in-flight mutation.
///
/// Created when a mutation starts, updated by every save inside it (the
/// flag is OR-ed), and consumed when the mutation commits. It is never
/// attached to the record, so nothing survives past one mutation.
#[derive(Debug, Default)]
pub struct MutationContext {
    pub(crate) dirty: bool,
    pub(crate) tracked: bool,
    pub(crate) created: bool,
    pub(crate) previous: Option<PreviousState>,
}

/// What the record looked like in the index before the mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreviousState {
    pub(crate) object_id: Option<crate::model::ObjectId>,
    pub(crate) indexable: Vec<bool>,
}

impl MutationContext {
    /// Starts a new mutation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any save in this mutation was dirty.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether at least one save was tracked.
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }
}
