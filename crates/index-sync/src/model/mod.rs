//! Model configuration.
//!
//! A [`ModelConfiguration`] describes how one record type is indexed: its
//! index targets (primary, replicas, virtual replicas and additional
//! indices), how a record becomes a document, how its object id is derived,
//! when it is indexable, and how dirtiness is detected. It is built once with
//! [`ModelConfigurationBuilder`], validated, and read-only afterwards.
//!
//! # Example
//!
//! ```
//! use index_sync::model::{IndexDeclaration, IndexSettings, ModelConfiguration};
//! use index_sync::record::MemoryRecord;
//!
//! let city = ModelConfiguration::<MemoryRecord>::builder("City")
//!     .index_name("City")
//!     .per_environment(true)
//!     .settings(IndexSettings::new().custom_ranking(["desc(b)"]))
//!     .replica(
//!         IndexDeclaration::new("City_replica1")
//!             .settings(IndexSettings::new().custom_ranking(["asc(a)"])),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(city.targets().len(), 2);
//! assert!(city.targets()[1].kind.is_replica());
//! ```

pub mod attributes;
pub mod conditions;
pub mod object_id;
pub mod settings;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use attributes::{
    Attribute, AttributeMapper, AttributeSource, Document, FieldValue, GeolocSource,
    OBJECT_ID_FIELD, Serializer, TagSource,
};
pub use conditions::{Conditions, Predicate};
pub use object_id::{IdStrategy, ObjectId};
pub use settings::{IndexSettings, REPLICAS_KEY, settings_changed};

use crate::dirty::{ChangeDetection, DirtyStrategy, DirtyTracker};
use crate::error::ConfigurationError;
use crate::jobs::JobDispatcher;
use crate::record::Record;
use crate::replicas::ReplicaGraph;
use crate::sanitize::HtmlSanitizer;

/// A boolean option that is either fixed or evaluated on every use.
#[derive(Clone)]
pub enum Toggle {
    /// A fixed value.
    Constant(bool),
    /// A zero-argument callback.
    Deferred(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Toggle {
    /// Creates a deferred toggle.
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Toggle::Deferred(Arc::new(f))
    }

    /// Evaluates the toggle.
    pub fn evaluate(&self) -> bool {
        match self {
            Toggle::Constant(value) => *value,
            Toggle::Deferred(f) => f(),
        }
    }
}

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        Toggle::Constant(value)
    }
}

impl Default for Toggle {
    fn default() -> Self {
        Toggle::Constant(false)
    }
}

impl fmt::Debug for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Toggle::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Toggle::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// How record mutations reach the remote index.
#[derive(Clone, Default)]
pub enum EnqueuePolicy {
    /// Call the remote API inline.
    #[default]
    Direct,
    /// Hand a job descriptor to the job system.
    Enqueue(Arc<dyn JobDispatcher>),
    /// Drop the operation.
    Disabled,
}

impl fmt::Debug for EnqueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueuePolicy::Direct => f.write_str("Direct"),
            EnqueuePolicy::Enqueue(_) => f.write_str("Enqueue(..)"),
            EnqueuePolicy::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Position of a target in its model's target list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(usize);

impl TargetId {
    /// Creates a target id from a list position.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The list position.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Role of an index target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The model's main index.
    Primary,
    /// A standalone replica, optionally inheriting its owner's settings.
    Replica {
        /// Whether the owner's settings are merged under the replica's.
        inherit: bool,
    },
    /// A virtual replica.
    VirtualReplica,
    /// An independent secondary index.
    Additional,
}

impl TargetKind {
    /// Replicas only receive settings; records are written to their owner.
    pub fn is_replica(&self) -> bool {
        matches!(self, TargetKind::Replica { .. } | TargetKind::VirtualReplica)
    }

    /// Whether records are written to targets of this kind.
    pub fn is_writable(&self) -> bool {
        !self.is_replica()
    }
}

/// One resolved index target.
pub struct IndexTarget<R> {
    /// Position in the model's target list.
    pub id: TargetId,
    /// Declared (unsuffixed) index name.
    pub name: String,
    /// Whether the environment suffix is appended.
    pub per_environment: bool,
    /// Role of the target.
    pub kind: TargetKind,
    /// Declared settings (before inheritance).
    pub settings: IndexSettings,
    /// Indexability conditions.
    pub conditions: Conditions<R>,
    /// Owning target of a replica.
    pub parent: Option<TargetId>,
}

impl<R> fmt::Debug for IndexTarget<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("per_environment", &self.per_environment)
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("conditions", &self.conditions)
            .field("parent", &self.parent)
            .finish()
    }
}

/// Declarative input for one index and the replicas under it.
pub struct IndexDeclaration<R> {
    name: String,
    per_environment: Option<bool>,
    settings: IndexSettings,
    inherit: bool,
    is_virtual: bool,
    conditions: Option<Conditions<R>>,
    replicas: Vec<IndexDeclaration<R>>,
}

impl<R> IndexDeclaration<R> {
    /// Declares an index.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            per_environment: None,
            settings: IndexSettings::default(),
            inherit: false,
            is_virtual: false,
            conditions: None,
            replicas: Vec::new(),
        }
    }

    /// Appends the environment suffix to this index name.
    pub fn per_environment(mut self, enabled: bool) -> Self {
        self.per_environment = Some(enabled);
        self
    }

    /// Sets the declared settings.
    pub fn settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Makes this replica inherit its owner's settings.
    pub fn inherit(mut self) -> Self {
        self.inherit = true;
        self
    }

    /// Makes this replica virtual.
    pub fn virtual_replica(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Sets the conditions of this index.
    pub fn conditions(mut self, conditions: Conditions<R>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Sets the include predicate of this index.
    pub fn when(mut self, predicate: Predicate<R>) -> Self {
        self.conditions = Some(self.conditions.take().unwrap_or_default().when(predicate));
        self
    }

    /// Sets the exclude predicate of this index.
    pub fn unless(mut self, predicate: Predicate<R>) -> Self {
        self.conditions = Some(self.conditions.take().unwrap_or_default().unless(predicate));
        self
    }

    /// Declares a replica owned by this index.
    pub fn replica(mut self, replica: IndexDeclaration<R>) -> Self {
        self.replicas.push(replica);
        self
    }
}

/// Immutable indexing configuration of one model.
pub struct ModelConfiguration<R> {
    model_type: String,
    targets: Vec<IndexTarget<R>>,
    graph: ReplicaGraph,
    mapper: AttributeMapper<R>,
    id_strategy: IdStrategy<R>,
    dirty: DirtyTracker<R>,
    synchronous: bool,
    auto_index: bool,
    auto_remove: bool,
    check_settings: Option<bool>,
    disable_indexing: Toggle,
    enqueue: EnqueuePolicy,
}

impl<R> ModelConfiguration<R> {
    /// Starts building a configuration for a model type.
    pub fn builder(model_type: impl Into<String>) -> ModelConfigurationBuilder<R> {
        ModelConfigurationBuilder::new(model_type)
    }

    /// The model type name.
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// All targets, primary first.
    pub fn targets(&self) -> &[IndexTarget<R>] {
        &self.targets
    }

    /// The target with the given id.
    pub fn target(&self, id: TargetId) -> Option<&IndexTarget<R>> {
        self.targets.get(id.index())
    }

    /// The primary target.
    pub fn primary(&self) -> Option<&IndexTarget<R>> {
        self.targets.iter().find(|t| t.kind == TargetKind::Primary)
    }

    /// Targets records are written to: the primary and additional indices.
    pub fn writable_targets(&self) -> impl Iterator<Item = &IndexTarget<R>> {
        self.targets.iter().filter(|t| t.kind.is_writable())
    }

    /// Finds a target by its declared name.
    pub fn find_target(&self, name: &str) -> Option<&IndexTarget<R>> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// The replica graph.
    pub fn graph(&self) -> &ReplicaGraph {
        &self.graph
    }

    /// The attribute mapper.
    pub fn mapper(&self) -> &AttributeMapper<R> {
        &self.mapper
    }

    /// The object id strategy.
    pub fn id_strategy(&self) -> &IdStrategy<R> {
        &self.id_strategy
    }

    /// The dirty tracker.
    pub fn dirty_tracker(&self) -> &DirtyTracker<R> {
        &self.dirty
    }

    /// Whether remote writes wait for task completion.
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Whether creates and updates are dispatched automatically.
    pub fn auto_index(&self) -> bool {
        self.auto_index
    }

    /// Whether destroys are dispatched automatically.
    pub fn auto_remove(&self) -> bool {
        self.auto_remove
    }

    /// Whether remote settings are checked lazily, given the engine default.
    pub fn check_settings(&self, engine_default: bool) -> bool {
        self.check_settings.unwrap_or(engine_default)
    }

    /// Whether this model currently issues no remote call at all.
    pub fn indexing_disabled(&self) -> bool {
        self.disable_indexing.evaluate()
    }

    /// The enqueue policy.
    pub fn enqueue_policy(&self) -> &EnqueuePolicy {
        &self.enqueue
    }
}

impl<R: Record> ModelConfiguration<R> {
    /// Maps a record into its document (without the object id).
    pub fn document(&self, record: &R) -> Document {
        self.mapper.map(record)
    }

    /// Resolves a record's object id.
    pub fn object_id(&self, record: &R) -> Option<ObjectId> {
        self.id_strategy.resolve(record)
    }

    /// Whether a record belongs in a target right now.
    pub fn is_indexable(&self, record: &R, target: &IndexTarget<R>) -> bool {
        self.object_id(record).is_some() && target.conditions.should_index(record)
    }
}

impl<R> fmt::Debug for ModelConfiguration<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfiguration")
            .field("model_type", &self.model_type)
            .field("targets", &self.targets)
            .field("mapper", &self.mapper)
            .field("id_strategy", &self.id_strategy)
            .field("dirty", &self.dirty)
            .field("synchronous", &self.synchronous)
            .field("enqueue", &self.enqueue)
            .finish()
    }
}

/// Builder for [`ModelConfiguration`].
pub struct ModelConfigurationBuilder<R> {
    model_type: String,
    primary: Option<IndexDeclaration<R>>,
    additional: Vec<IndexDeclaration<R>>,
    per_environment: bool,
    conditions: Conditions<R>,
    attributes: Vec<Attribute<R>>,
    additional_attributes: Vec<Attribute<R>>,
    serializer: Option<Arc<dyn Serializer<R>>>,
    tags: Option<TagSource<R>>,
    geoloc: Option<GeolocSource<R>>,
    id_strategy: IdStrategy<R>,
    dirty_strategy: DirtyStrategy<R>,
    change_detection: HashMap<String, ChangeDetection<R>>,
    synchronous: bool,
    sanitize: bool,
    force_utf8: bool,
    auto_index: bool,
    auto_remove: bool,
    check_settings: Option<bool>,
    disable_indexing: Toggle,
    enqueue: EnqueuePolicy,
}

impl<R> ModelConfigurationBuilder<R> {
    /// Creates a builder for a model type.
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            primary: None,
            additional: Vec::new(),
            per_environment: false,
            conditions: Conditions::none(),
            attributes: Vec::new(),
            additional_attributes: Vec::new(),
            serializer: None,
            tags: None,
            geoloc: None,
            id_strategy: IdStrategy::Native,
            dirty_strategy: DirtyStrategy::FieldDiff,
            change_detection: HashMap::new(),
            synchronous: false,
            sanitize: false,
            force_utf8: false,
            auto_index: true,
            auto_remove: true,
            check_settings: None,
            disable_indexing: Toggle::Constant(false),
            enqueue: EnqueuePolicy::Direct,
        }
    }

    fn primary_mut(&mut self) -> &mut IndexDeclaration<R> {
        let model_type = self.model_type.clone();
        self.primary
            .get_or_insert_with(|| IndexDeclaration::new(model_type))
    }

    /// Declares the primary index in full.
    pub fn primary(mut self, declaration: IndexDeclaration<R>) -> Self {
        self.primary = Some(declaration);
        self
    }

    /// Sets the primary index name.
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.primary_mut().name = name.into();
        self
    }

    /// Sets the primary index settings.
    pub fn settings(mut self, settings: IndexSettings) -> Self {
        self.primary_mut().settings = settings;
        self
    }

    /// Declares a replica of the primary index.
    pub fn replica(mut self, replica: IndexDeclaration<R>) -> Self {
        self.primary_mut().replicas.push(replica);
        self
    }

    /// Declares an additional index.
    pub fn additional_index(mut self, declaration: IndexDeclaration<R>) -> Self {
        self.additional.push(declaration);
        self
    }

    /// Default environment suffixing for every declared index.
    pub fn per_environment(mut self, enabled: bool) -> Self {
        self.per_environment = enabled;
        self
    }

    /// Include predicate of the primary index.
    pub fn when(mut self, predicate: Predicate<R>) -> Self {
        self.conditions = self.conditions.when(predicate);
        self
    }

    /// Exclude predicate of the primary index.
    pub fn unless(mut self, predicate: Predicate<R>) -> Self {
        self.conditions = self.conditions.unless(predicate);
        self
    }

    /// Adds a stored field to the document under its own name.
    pub fn attribute(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.attributes.push(Attribute {
            name: field.clone(),
            source: AttributeSource::Field(field),
        });
        self
    }

    /// Adds several stored fields to the document.
    pub fn attributes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self = self.attribute(field);
        }
        self
    }

    /// Adds a computed attribute. `depends_on` lists the stored fields it
    /// reads; leave it empty when they are unknown.
    pub fn computed<F, V>(mut self, name: impl Into<String>, depends_on: &[&str], f: F) -> Self
    where
        F: Fn(&R) -> V + Send + Sync + 'static,
        V: Into<FieldValue>,
    {
        self.attributes.push(computed_attribute(name, depends_on, f));
        self
    }

    /// Adds a computed attribute on top of the record's stored attributes.
    pub fn add_computed<F, V>(mut self, name: impl Into<String>, depends_on: &[&str], f: F) -> Self
    where
        F: Fn(&R) -> V + Send + Sync + 'static,
        V: Into<FieldValue>,
    {
        self.additional_attributes
            .push(computed_attribute(name, depends_on, f));
        self
    }

    /// Replaces per-attribute mapping with a serializer.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer<R>>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Adds a constant `_tags` list.
    pub fn static_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(TagSource::Static(tags.into_iter().map(Into::into).collect()));
        self
    }

    /// Computes `_tags` from the record.
    pub fn tags<F>(mut self, depends_on: &[&str], f: F) -> Self
    where
        F: Fn(&R) -> Vec<String> + Send + Sync + 'static,
    {
        self.tags = Some(TagSource::Computed {
            compute: Arc::new(f),
            depends_on: owned(depends_on),
        });
        self
    }

    /// Computes `_geoloc` from the record, replacing the lat/lng default.
    pub fn geoloc<F>(mut self, depends_on: &[&str], f: F) -> Self
    where
        F: Fn(&R) -> Option<Value> + Send + Sync + 'static,
    {
        self.geoloc = Some(GeolocSource {
            compute: Arc::new(f),
            depends_on: owned(depends_on),
        });
        self
    }

    /// Sets how the object id is derived.
    pub fn id(mut self, strategy: IdStrategy<R>) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Sets the dirty strategy.
    pub fn dirty(mut self, strategy: DirtyStrategy<R>) -> Self {
        self.dirty_strategy = strategy;
        self
    }

    /// Declares how changes to one field, attribute, `_tags` or `_geoloc`
    /// are detected.
    pub fn change_detection(
        mut self,
        name: impl Into<String>,
        detection: ChangeDetection<R>,
    ) -> Self {
        self.change_detection.insert(name.into(), detection);
        self
    }

    /// Waits for remote task completion after every write.
    pub fn synchronous(mut self, enabled: bool) -> Self {
        self.synchronous = enabled;
        self
    }

    /// Sanitizes HTML in text attributes.
    pub fn sanitize(mut self, enabled: bool) -> Self {
        self.sanitize = enabled;
        self
    }

    /// Reinterprets byte attributes as UTF-8.
    pub fn force_utf8(mut self, enabled: bool) -> Self {
        self.force_utf8 = enabled;
        self
    }

    /// Dispatches creates and updates automatically.
    pub fn auto_index(mut self, enabled: bool) -> Self {
        self.auto_index = enabled;
        self
    }

    /// Dispatches destroys automatically.
    pub fn auto_remove(mut self, enabled: bool) -> Self {
        self.auto_remove = enabled;
        self
    }

    /// Overrides the engine's lazy settings check for this model.
    pub fn check_settings(mut self, enabled: bool) -> Self {
        self.check_settings = Some(enabled);
        self
    }

    /// Disables every remote call of this model.
    pub fn disable_indexing(mut self, toggle: impl Into<Toggle>) -> Self {
        self.disable_indexing = toggle.into();
        self
    }

    /// Sets the enqueue policy.
    pub fn enqueue(mut self, policy: EnqueuePolicy) -> Self {
        self.enqueue = policy;
        self
    }

    /// Validates the declarations and builds the configuration.
    pub fn build(self) -> Result<ModelConfiguration<R>, ConfigurationError> {
        let model = self.model_type.clone();
        let primary = match self.primary {
            Some(primary) => primary,
            None if self.additional.is_empty() => {
                return Err(ConfigurationError::MissingIndexBlock { model });
            }
            None => return Err(ConfigurationError::NoPrimaryIndex { model }),
        };

        let mut targets: Vec<IndexTarget<R>> = Vec::new();
        let primary_conditions = primary.conditions.clone().unwrap_or(self.conditions);
        flatten(
            &model,
            primary,
            TargetKind::Primary,
            primary_conditions,
            self.per_environment,
            &mut targets,
        )?;
        for declaration in self.additional {
            let conditions = declaration.conditions.clone().unwrap_or_default();
            flatten(
                &model,
                declaration,
                TargetKind::Additional,
                conditions,
                self.per_environment,
                &mut targets,
            )?;
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if target.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyIndexName { model });
            }
            if !seen.insert((target.name.clone(), target.per_environment)) {
                return Err(ConfigurationError::DuplicateIndex {
                    model,
                    index: target.name.clone(),
                });
            }
        }

        let sanitizer = if self.sanitize {
            Some(HtmlSanitizer::new()?)
        } else {
            None
        };
        let mapper = AttributeMapper {
            attributes: self.attributes,
            additional: self.additional_attributes,
            serializer: self.serializer,
            tags: self.tags,
            geoloc: self.geoloc,
            sanitizer,
            force_utf8: self.force_utf8,
        };

        let mut extra_fields: Vec<String> = self
            .id_strategy
            .tracked_field()
            .map(str::to_string)
            .into_iter()
            .collect();
        for target in targets.iter().filter(|t| t.kind.is_writable()) {
            extra_fields.extend(target.conditions.tracked_fields());
        }
        let dirty = DirtyTracker::resolve(
            self.dirty_strategy,
            self.change_detection,
            &mapper,
            extra_fields,
        );

        let graph = ReplicaGraph::build(&targets);

        Ok(ModelConfiguration {
            model_type: model,
            targets,
            graph,
            mapper,
            id_strategy: self.id_strategy,
            dirty,
            synchronous: self.synchronous,
            auto_index: self.auto_index,
            auto_remove: self.auto_remove,
            check_settings: self.check_settings,
            disable_indexing: self.disable_indexing,
            enqueue: self.enqueue,
        })
    }
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

fn computed_attribute<R, F, V>(name: impl Into<String>, depends_on: &[&str], f: F) -> Attribute<R>
where
    F: Fn(&R) -> V + Send + Sync + 'static,
    V: Into<FieldValue>,
{
    Attribute {
        name: name.into(),
        source: AttributeSource::Computed {
            compute: Arc::new(move |record: &R| f(record).into()),
            depends_on: owned(depends_on),
        },
    }
}

fn flatten<R>(
    model: &str,
    declaration: IndexDeclaration<R>,
    kind: TargetKind,
    conditions: Conditions<R>,
    default_per_environment: bool,
    targets: &mut Vec<IndexTarget<R>>,
) -> Result<(), ConfigurationError> {
    let owner = TargetId::new(targets.len());
    targets.push(IndexTarget {
        id: owner,
        name: declaration.name,
        per_environment: declaration.per_environment.unwrap_or(default_per_environment),
        kind,
        settings: declaration.settings,
        conditions: conditions.clone(),
        parent: None,
    });

    for replica in declaration.replicas {
        if !replica.replicas.is_empty() {
            let orphan = replica
                .replicas
                .first()
                .map(|r| r.name.clone())
                .unwrap_or_default();
            return Err(ConfigurationError::OrphanReplica {
                model: model.to_string(),
                replica: orphan,
            });
        }
        let kind = match (replica.is_virtual, replica.inherit) {
            (true, true) => {
                return Err(ConfigurationError::ContradictoryInheritance {
                    model: model.to_string(),
                    replica: replica.name,
                });
            }
            (true, false) => TargetKind::VirtualReplica,
            (false, inherit) => TargetKind::Replica { inherit },
        };
        targets.push(IndexTarget {
            id: TargetId::new(targets.len()),
            name: replica.name,
            per_environment: replica.per_environment.unwrap_or(default_per_environment),
            kind,
            settings: replica.settings,
            conditions: conditions.clone(),
            parent: Some(owner),
        });
    }
    Ok(())
}
