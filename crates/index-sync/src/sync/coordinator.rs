//! Per-model orchestration of record mutations.
//!
//! A [`SyncCoordinator`] binds one [`ModelConfiguration`] to a search client
//! and the engine configuration. Persistence hooks drive it:
//!
//! 1. at every save inside a mutation, call [`SyncCoordinator::track`] with
//!    the pre-mutation snapshot (before the record's change flags are
//!    cleared);
//! 2. once the mutation commits, call [`SyncCoordinator::commit`].
//!
//! [`on_create`](SyncCoordinator::on_create) and
//! [`on_update`](SyncCoordinator::on_update) do both for single-save
//! mutations. Each writable target then goes through
//! `Evaluating -> {Saving | Deleting | Skipped}` independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::batch::{BatchIndexer, ReindexProgress, ReindexRequest};
use super::settings::{SettingsOutcome, SettingsSynchronizer, wait_for_task};
use super::suppress;
use crate::client::{FacetHit, SearchClient, SearchQuery, SearchResponse, TaskId};
use crate::config::EngineConfig;
use crate::dirty::{MutationContext, PreviousState};
use crate::error::{ConfigurationError, NotIndexableError, SyncResult};
use crate::jobs::{IndexJob, JobOperation};
use crate::model::{
    Document, EnqueuePolicy, IndexTarget, ModelConfiguration, OBJECT_ID_FIELD, ObjectId,
};
use crate::record::Record;

/// Why no remote call was made for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Inside a `without_auto_index` scope.
    Suppressed,
    /// The model turned automatic dispatch off.
    AutoIndexOff,
    /// Indexing is disabled for the model or the whole engine.
    Disabled,
    /// The record is not, and was not, indexable in the target.
    NotIndexable,
    /// Nothing the document depends on changed.
    Unchanged,
    /// The enqueue policy drops operations.
    Dropped,
    /// The object was already absent remotely.
    AlreadyAbsent,
}

/// What happened to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAction {
    /// The document was saved.
    Saved(TaskId),
    /// The document was deleted.
    Deleted(TaskId),
    /// A job was handed to the job system.
    Enqueued(JobOperation),
    /// No call was made.
    Skipped(SkipReason),
}

/// Outcome of one mutation for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    /// Resolved index name.
    pub target: String,
    /// What happened.
    pub action: TargetAction,
}

impl TargetOutcome {
    /// Whether a remote save or delete was issued.
    pub fn is_remote_write(&self) -> bool {
        matches!(self.action, TargetAction::Saved(_) | TargetAction::Deleted(_))
    }
}

pub(crate) enum PendingOp {
    Save(ObjectId, Document),
    Delete(ObjectId),
}

impl PendingOp {
    fn operation(&self) -> JobOperation {
        match self {
            PendingOp::Save(..) => JobOperation::Save,
            PendingOp::Delete(_) => JobOperation::Delete,
        }
    }

    fn object_id(&self) -> &ObjectId {
        match self {
            PendingOp::Save(id, _) | PendingOp::Delete(id) => id,
        }
    }
}

/// How an operation reaches the remote index.
#[derive(Clone, Copy)]
enum Route<'a> {
    /// Honors the model's enqueue policy; jobs carry the record's key.
    Policy(Option<&'a str>),
    /// Calls the remote API inline.
    Direct,
}

/// The record's primary key as a job system would look it up.
fn record_key<R: Record>(record: &R) -> Option<String> {
    match record.primary_key()? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Adds the object id to a mapped document.
pub(crate) fn with_object_id(mut document: Document, id: &ObjectId) -> Document {
    document.insert(
        OBJECT_ID_FIELD.to_string(),
        serde_json::Value::String(id.to_string()),
    );
    document
}

/// Keeps the indices of one model in sync with its records.
pub struct SyncCoordinator<R> {
    model: Arc<ModelConfiguration<R>>,
    client: Arc<dyn SearchClient>,
    config: EngineConfig,
    names: Vec<String>,
    settings: SettingsSynchronizer,
    reindex_jobs: RwLock<HashMap<Uuid, ReindexProgress>>,
}

impl<R: Record> SyncCoordinator<R> {
    /// Creates a coordinator and resolves every target name.
    pub fn new(
        model: Arc<ModelConfiguration<R>>,
        client: Arc<dyn SearchClient>,
        config: EngineConfig,
    ) -> Self {
        let names = model
            .targets()
            .iter()
            .map(|t| config.resolve_index_name(&t.name, t.per_environment))
            .collect();
        let settings = SettingsSynchronizer::new(Arc::clone(&client), config.task_wait_timeout);
        Self {
            model,
            client,
            config,
            names,
            settings,
            reindex_jobs: RwLock::new(HashMap::new()),
        }
    }

    /// The model configuration.
    pub fn model(&self) -> &ModelConfiguration<R> {
        &self.model
    }

    pub(crate) fn client(&self) -> &dyn SearchClient {
        self.client.as_ref()
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn settings(&self) -> &SettingsSynchronizer {
        &self.settings
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn name_of(&self, target: &IndexTarget<R>) -> &str {
        &self.names[target.id.index()]
    }

    /// Resolved name of the primary index.
    pub fn index_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    /// Resolved name of a target, looked up by its declared name.
    pub fn target_name(&self, declared: &str) -> Option<&str> {
        self.model.find_target(declared).map(|t| self.name_of(t))
    }

    /// Name of the scratch index used by temporary-index reindexing.
    pub fn temporary_index_name(&self) -> String {
        format!("{}.tmp", self.index_name())
    }

    /// Whether the engine or the model currently disables every remote call.
    pub fn is_disabled(&self) -> bool {
        self.config.disable_indexing || self.model.indexing_disabled()
    }

    /// Runs `fut` with automatic dispatch suppressed for the current task.
    pub async fn without_auto_index<F: Future>(&self, fut: F) -> F::Output {
        suppress::without_auto_index(fut).await
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Lazy settings check before the first write to a target and its replicas.
    pub async fn ensure_init(&self, target: &IndexTarget<R>) -> SyncResult<()> {
        if self.is_disabled() || !self.model.check_settings(self.config.check_settings) {
            return Ok(());
        }
        let graph = self.model.graph();
        let replicas = graph.replicas_of(target.id).iter().map(|(id, _)| *id);
        for id in std::iter::once(target.id).chain(replicas) {
            let desired = graph.desired_settings(id, self.model.targets(), &self.names);
            let name = &self.names[id.index()];
            self.settings
                .ensure_once(name, &desired, self.model.is_synchronous())
                .await?;
        }
        Ok(())
    }

    /// Diffs and pushes settings now, for one declared target or all of them.
    ///
    /// Runs regardless of `check_settings`; does nothing when indexing is
    /// disabled.
    pub async fn ensure_settings(
        &self,
        declared: Option<&str>,
    ) -> SyncResult<Vec<(String, SettingsOutcome)>> {
        if self.is_disabled() {
            return Ok(Vec::new());
        }
        let targets: Vec<&IndexTarget<R>> = match declared {
            Some(raw) => vec![self.find(raw)?],
            None => self.model.targets().iter().collect(),
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let desired =
                self.model
                    .graph()
                    .desired_settings(target.id, self.model.targets(), &self.names);
            let name = self.name_of(target);
            let outcome = self
                .settings
                .sync(name, &desired, self.model.is_synchronous())
                .await?;
            outcomes.push((name.to_string(), outcome));
        }
        Ok(outcomes)
    }

    /// Forgets which indices had their settings checked.
    pub fn reset_settings_cache(&self) {
        self.settings.reset();
    }

    fn find(&self, declared: &str) -> Result<&IndexTarget<R>, ConfigurationError> {
        self.model
            .find_target(declared)
            .ok_or_else(|| ConfigurationError::UnknownTarget {
                model: self.model.model_type().to_string(),
                index: declared.to_string(),
            })
    }

    // ========================================================================
    // Mutation hooks
    // ========================================================================

    /// Records one save of the mutation in `ctx`.
    ///
    /// `previous` is the record as it was before the mutation (`None` for a
    /// create). Must run before the record's change flags are cleared.
    pub fn track(&self, ctx: &mut MutationContext, previous: Option<&R>, current: &R) {
        if !ctx.tracked {
            ctx.created = previous.is_none();
            ctx.previous = previous.map(|p| self.snapshot(p));
        }
        ctx.tracked = true;
        if !ctx.dirty && self.model.dirty_tracker().must_reindex(previous, current) {
            ctx.dirty = true;
        }
    }

    fn snapshot(&self, record: &R) -> PreviousState {
        PreviousState {
            object_id: self.model.object_id(record),
            indexable: self
                .model
                .targets()
                .iter()
                .map(|t| self.model.is_indexable(record, t))
                .collect(),
        }
    }

    /// Dispatches the outcome of a committed mutation.
    pub async fn commit(&self, ctx: MutationContext, record: &R) -> SyncResult<Vec<TargetOutcome>> {
        if !ctx.tracked {
            return Ok(Vec::new());
        }
        if let Some(reason) = self.auto_skip(self.model.auto_index()) {
            return Ok(self.skip_all(reason));
        }

        let object_id = self.model.object_id(record);
        let key = record_key(record);
        let route = Route::Policy(key.as_deref());
        let previous_id = ctx.previous.as_ref().and_then(|p| p.object_id.clone());
        let mut outcomes = Vec::new();

        for target in self.model.writable_targets() {
            let was_indexable = ctx
                .previous
                .as_ref()
                .and_then(|p| p.indexable.get(target.id.index()).copied())
                .unwrap_or(false);
            let indexable = object_id.is_some() && target.conditions.should_index(record);

            match object_id.as_ref().filter(|_| indexable) {
                Some(id) => {
                    if !ctx.created && !ctx.dirty && was_indexable {
                        debug!(
                            model = %self.model.model_type(),
                            index = %self.name_of(target),
                            "record unchanged"
                        );
                        outcomes.push(self.skipped(target, SkipReason::Unchanged));
                        continue;
                    }
                    let moved = previous_id
                        .as_ref()
                        .filter(|old| was_indexable && *old != id);
                    if let Some(old) = moved {
                        let op = PendingOp::Delete(old.clone());
                        outcomes.push(self.apply(target, op, route).await?);
                    }
                    let document = self.model.document(record);
                    let op = PendingOp::Save(id.clone(), document);
                    outcomes.push(self.apply(target, op, route).await?);
                }
                None => match previous_id.as_ref().filter(|_| was_indexable) {
                    Some(old) => {
                        let op = PendingOp::Delete(old.clone());
                        outcomes.push(self.apply(target, op, route).await?);
                    }
                    None => {
                        debug!(
                            model = %self.model.model_type(),
                            index = %self.name_of(target),
                            "record not indexable"
                        );
                        outcomes.push(self.skipped(target, SkipReason::NotIndexable));
                    }
                },
            }
        }
        Ok(outcomes)
    }

    /// Create hook: one tracked save, then commit.
    pub async fn on_create(&self, record: &R) -> SyncResult<Vec<TargetOutcome>> {
        let mut ctx = MutationContext::new();
        self.track(&mut ctx, None, record);
        self.commit(ctx, record).await
    }

    /// Update hook: one tracked save, then commit.
    pub async fn on_update(&self, previous: &R, record: &R) -> SyncResult<Vec<TargetOutcome>> {
        let mut ctx = MutationContext::new();
        self.track(&mut ctx, Some(previous), record);
        self.commit(ctx, record).await
    }

    /// Destroy hook: deletes the record from every target it is indexable in.
    pub async fn on_destroy(&self, record: &R) -> SyncResult<Vec<TargetOutcome>> {
        if let Some(reason) = self.auto_skip(self.model.auto_remove()) {
            return Ok(self.skip_all(reason));
        }
        let Some(id) = self.model.object_id(record) else {
            return Ok(self.skip_all(SkipReason::NotIndexable));
        };

        let key = record_key(record);
        let mut outcomes = Vec::new();
        for target in self.model.writable_targets() {
            if target.conditions.should_index(record) {
                let op = PendingOp::Delete(id.clone());
                outcomes.push(self.apply(target, op, Route::Policy(key.as_deref())).await?);
            } else {
                outcomes.push(self.skipped(target, SkipReason::NotIndexable));
            }
        }
        Ok(outcomes)
    }

    // ========================================================================
    // Explicit operations
    // ========================================================================

    /// Sends the record to every writable target it is indexable in and
    /// removes it from those it is not.
    ///
    /// Fails when the record is not persisted, has no object id, or is
    /// indexable nowhere. Not affected by suppression or the enqueue policy.
    pub async fn index_record(&self, record: &R) -> SyncResult<Vec<TargetOutcome>> {
        let model = self.model.model_type().to_string();
        if !record.is_persisted() {
            return Err(NotIndexableError::NotPersisted { model }.into());
        }
        let id = self
            .model
            .object_id(record)
            .ok_or_else(|| NotIndexableError::MissingObjectId {
                model: model.clone(),
            })?;
        if self.is_disabled() {
            return Ok(self.skip_all(SkipReason::Disabled));
        }

        let plan: Vec<(&IndexTarget<R>, bool)> = self
            .model
            .writable_targets()
            .map(|t| (t, t.conditions.should_index(record)))
            .collect();
        if !plan.iter().any(|(_, indexable)| *indexable) {
            return Err(NotIndexableError::ConditionFailed {
                model,
                object_id: id.to_string(),
                index: self.index_name().to_string(),
            }
            .into());
        }

        let mut outcomes = Vec::with_capacity(plan.len());
        for (target, indexable) in plan {
            let op = if indexable {
                PendingOp::Save(id.clone(), self.model.document(record))
            } else {
                PendingOp::Delete(id.clone())
            };
            outcomes.push(self.apply(target, op, Route::Direct).await?);
        }
        Ok(outcomes)
    }

    /// Deletes the record from every writable target.
    pub async fn remove_record(&self, record: &R) -> SyncResult<Vec<TargetOutcome>> {
        let id = self.model.object_id(record).ok_or_else(|| {
            NotIndexableError::MissingObjectId {
                model: self.model.model_type().to_string(),
            }
        })?;
        if self.is_disabled() {
            return Ok(self.skip_all(SkipReason::Disabled));
        }
        let mut outcomes = Vec::new();
        for target in self.model.writable_targets() {
            outcomes.push(self.apply(target, PendingOp::Delete(id.clone()), Route::Direct).await?);
        }
        Ok(outcomes)
    }

    /// Executes an enqueued job. `record` is the live record the job system
    /// resolved, or `None` when it no longer exists.
    pub async fn perform_job(
        &self,
        job: &IndexJob,
        record: Option<&R>,
    ) -> SyncResult<TargetOutcome> {
        let target = self
            .model
            .writable_targets()
            .find(|t| self.name_of(t) == job.target_name)
            .ok_or_else(|| ConfigurationError::UnknownTarget {
                model: self.model.model_type().to_string(),
                index: job.target_name.clone(),
            })?;
        if self.is_disabled() {
            return Ok(self.skipped(target, SkipReason::Disabled));
        }

        let queued_id = ObjectId::from(job.object_id.as_str());
        let op = match (job.operation, record) {
            (JobOperation::Save, Some(record)) if self.model.is_indexable(record, target) => {
                let id = self.model.object_id(record).unwrap_or(queued_id);
                PendingOp::Save(id, self.model.document(record))
            }
            _ => PendingOp::Delete(queued_id),
        };
        debug!(
            job = %job.job_id,
            operation = %op.operation(),
            index = %job.target_name,
            "performing index job"
        );
        self.apply(target, op, Route::Direct).await
    }

    /// Removes every object from the writable targets, keeping settings.
    pub async fn clear_index(&self, wait: bool) -> SyncResult<()> {
        if self.is_disabled() {
            return Ok(());
        }
        for target in self.model.writable_targets() {
            let name = self.name_of(target);
            let task = self.client.clear_objects(name).await?;
            self.settle(name, task, wait).await?;
        }
        Ok(())
    }

    /// Queries the primary index, or a target by its declared name.
    pub async fn raw_search(
        &self,
        query: &SearchQuery,
        declared: Option<&str>,
    ) -> SyncResult<SearchResponse> {
        let target = match declared {
            Some(raw) => self.find(raw)?,
            None => &self.model.targets()[0],
        };
        if self.is_disabled() {
            return Ok(SearchResponse::default());
        }
        self.ensure_init(target).await?;
        Ok(self.client.search(self.name_of(target), query).await?)
    }

    /// Searches the values of `facet` on the primary index, or on a target
    /// by its declared name. Counts cover the objects matching `query`.
    pub async fn search_facet_values(
        &self,
        facet: &str,
        facet_query: &str,
        query: &SearchQuery,
        declared: Option<&str>,
    ) -> SyncResult<Vec<FacetHit>> {
        let target = match declared {
            Some(raw) => self.find(raw)?,
            None => &self.model.targets()[0],
        };
        if self.is_disabled() {
            return Ok(Vec::new());
        }
        self.ensure_init(target).await?;
        let name = self.name_of(target);
        debug!(index = %name, facet, "searching facet values");
        Ok(self
            .client
            .search_for_facet_values(name, facet, facet_query, query)
            .await?)
    }

    /// Bulk reindex; see [`BatchIndexer::reindex`].
    pub async fn reindex<'a, I>(
        &self,
        records: I,
        request: &ReindexRequest,
    ) -> SyncResult<ReindexProgress>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        BatchIndexer::new(self).reindex(records, request).await
    }

    /// In-place bulk reindex; see [`BatchIndexer::reindex_in_place`].
    pub async fn reindex_in_place<'a, I>(
        &self,
        records: I,
        request: &ReindexRequest,
    ) -> SyncResult<ReindexProgress>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        BatchIndexer::new(self).reindex_in_place(records, request).await
    }

    /// Progress of a reindex started by this coordinator.
    pub fn reindex_progress(&self, job_id: Uuid) -> Option<ReindexProgress> {
        self.reindex_jobs.read().get(&job_id).cloned()
    }

    /// Every reindex started by this coordinator, oldest first.
    pub fn list_reindex_jobs(&self) -> Vec<ReindexProgress> {
        let mut jobs: Vec<ReindexProgress> = self.reindex_jobs.read().values().cloned().collect();
        jobs.sort_by_key(|p| p.started_at);
        jobs
    }

    pub(crate) fn record_reindex(&self, progress: ReindexProgress) {
        self.reindex_jobs.write().insert(progress.job_id, progress);
    }

    /// Saves indexable records without deleting anything.
    pub async fn index_objects<'a, I>(&self, records: I, wait: bool) -> SyncResult<usize>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        BatchIndexer::new(self).index_objects(records, wait).await
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn auto_skip(&self, enabled: bool) -> Option<SkipReason> {
        if suppress::is_suppressed() {
            Some(SkipReason::Suppressed)
        } else if !enabled {
            Some(SkipReason::AutoIndexOff)
        } else if self.is_disabled() {
            Some(SkipReason::Disabled)
        } else {
            None
        }
    }

    fn skipped(&self, target: &IndexTarget<R>, reason: SkipReason) -> TargetOutcome {
        TargetOutcome {
            target: self.name_of(target).to_string(),
            action: TargetAction::Skipped(reason),
        }
    }

    fn skip_all(&self, reason: SkipReason) -> Vec<TargetOutcome> {
        self.model
            .writable_targets()
            .map(|t| self.skipped(t, reason))
            .collect()
    }

    /// Waits for a task when asked to or when the model is synchronous.
    pub(crate) async fn settle(&self, index: &str, task: TaskId, wait: bool) -> SyncResult<()> {
        if wait || self.model.is_synchronous() {
            wait_for_task(self.client.as_ref(), index, task, self.config.task_wait_timeout).await?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        target: &IndexTarget<R>,
        op: PendingOp,
        route: Route<'_>,
    ) -> SyncResult<TargetOutcome> {
        let name = self.name_of(target);
        if let Route::Policy(record_key) = route {
            match self.model.enqueue_policy() {
                EnqueuePolicy::Direct => {}
                EnqueuePolicy::Disabled => return Ok(self.skipped(target, SkipReason::Dropped)),
                EnqueuePolicy::Enqueue(dispatcher) => {
                    let operation = op.operation();
                    let job = IndexJob::new(
                        self.model.model_type(),
                        op.object_id().to_string(),
                        operation,
                        name,
                        self.config.queue_name.as_str(),
                    )
                    .with_record_id(record_key.map(str::to_string));
                    debug!(
                        job = %job.job_id,
                        operation = %operation,
                        index = %name,
                        "enqueued index job"
                    );
                    dispatcher.enqueue(job)?;
                    return Ok(TargetOutcome {
                        target: name.to_string(),
                        action: TargetAction::Enqueued(operation),
                    });
                }
            }
        }

        self.ensure_init(target).await?;
        let action = match op {
            PendingOp::Save(id, document) => {
                let task = self
                    .client
                    .save_object(name, with_object_id(document, &id))
                    .await?;
                self.settle(name, task, false).await?;
                TargetAction::Saved(task)
            }
            PendingOp::Delete(id) => match self.client.delete_object(name, &id).await {
                Ok(task) => {
                    self.settle(name, task, false).await?;
                    TargetAction::Deleted(task)
                }
                Err(e) if e.is_not_found() => {
                    warn!(index = %name, object_id = %id, "object already absent");
                    TargetAction::Skipped(SkipReason::AlreadyAbsent)
                }
                Err(e) => return Err(e.into()),
            },
        };
        Ok(TargetOutcome {
            target: name.to_string(),
            action,
        })
    }
}

impl<R> std::fmt::Debug for SyncCoordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("model", &self.model.model_type())
            .field("names", &self.names)
            .field("settings", &self.settings)
            .finish()
    }
}
