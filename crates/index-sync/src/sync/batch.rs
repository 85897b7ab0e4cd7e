//! Bulk indexing.
//!
//! Two reindex modes are supported:
//!
//! - **temporary index** (default): each writable target is rebuilt in a
//!   scratch index `<name>.tmp` carrying the target's settings, which then
//!   replaces the target in one `move_index`. Readers never see a partially
//!   indexed target, and objects absent from the record set disappear.
//! - **in place**: documents are written straight into the live targets.
//!   Records that are not indexable in a target with declared conditions are
//!   deleted from it in the same pass; anything else already present stays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coordinator::{SyncCoordinator, with_object_id};
use crate::client::TaskId;
use crate::error::{ConfigurationError, ReindexError, SyncError, SyncResult};
use crate::model::{Document, IndexTarget, ObjectId, REPLICAS_KEY};
use crate::record::Record;

/// Request to start a reindex operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexRequest {
    /// Documents per bulk request (`None` = engine default).
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Whether to rebuild through a temporary index.
    #[serde(default = "default_temporary_index")]
    pub temporary_index: bool,

    /// Whether to block until the remote confirms the final task.
    #[serde(default)]
    pub wait: bool,
}

fn default_temporary_index() -> bool {
    true
}

impl Default for ReindexRequest {
    fn default() -> Self {
        Self {
            batch_size: None,
            temporary_index: default_temporary_index(),
            wait: false,
        }
    }
}

impl ReindexRequest {
    /// Rebuild through a temporary index.
    pub fn temporary() -> Self {
        Self::default()
    }

    /// Write directly into the live targets.
    pub fn in_place() -> Self {
        Self {
            temporary_index: false,
            ..Self::default()
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Blocks until the final task completes.
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }
}

/// Status of a reindex operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexStatus {
    /// Records are being written.
    InProgress,
    /// Every target was rebuilt.
    Completed,
    /// A remote call or the swap failed.
    Failed,
}

impl ReindexStatus {
    /// Returns true if the reindex is still running.
    pub fn is_running(&self) -> bool {
        matches!(self, ReindexStatus::InProgress)
    }

    /// Returns true if the reindex has finished.
    pub fn is_finished(&self) -> bool {
        matches!(self, ReindexStatus::Completed | ReindexStatus::Failed)
    }
}

/// Progress and result of a reindex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexProgress {
    /// Unique job identifier.
    pub job_id: Uuid,

    /// Model being reindexed.
    pub model_type: String,

    /// Current status.
    pub status: ReindexStatus,

    /// Records read from the input.
    pub total_records: u64,

    /// Documents saved, summed over targets.
    pub indexed_records: u64,

    /// Documents deleted, summed over targets.
    pub removed_records: u64,

    /// Bulk requests issued.
    pub batches: u64,

    /// Resolved names of the targets written.
    pub targets: Vec<String>,

    /// When the reindex started.
    pub started_at: DateTime<Utc>,

    /// When the reindex finished.
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message if status is Failed.
    pub error_message: Option<String>,
}

impl ReindexProgress {
    /// Starts tracking a reindex of a model.
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            model_type: model_type.into(),
            status: ReindexStatus::InProgress,
            total_records: 0,
            indexed_records: 0,
            removed_records: 0,
            batches: 0,
            targets: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    /// Returns true if the reindex failed.
    pub fn has_errors(&self) -> bool {
        self.status == ReindexStatus::Failed || self.error_message.is_some()
    }

    fn finish(mut self) -> Self {
        self.status = ReindexStatus::Completed;
        self.completed_at = Some(Utc::now());
        self
    }

    fn fail(mut self, error: &SyncError) -> Self {
        self.status = ReindexStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.to_string());
        self
    }
}

/// Pending writes for one target.
struct TargetBatch<'t, R> {
    target: &'t IndexTarget<R>,
    index: String,
    saves: Vec<Document>,
    deletes: Vec<ObjectId>,
    last_task: Option<TaskId>,
}

/// Bulk writes for one model.
pub struct BatchIndexer<'c, R> {
    coordinator: &'c SyncCoordinator<R>,
}

impl<'c, R: Record> BatchIndexer<'c, R> {
    /// Creates a batch indexer over a coordinator.
    pub fn new(coordinator: &'c SyncCoordinator<R>) -> Self {
        Self { coordinator }
    }

    fn batch_size(&self, requested: Option<usize>) -> Result<usize, ConfigurationError> {
        match requested.unwrap_or(self.coordinator.config().batch_size) {
            0 => Err(ConfigurationError::InvalidBatchSize),
            size => Ok(size),
        }
    }

    fn batches(&self, index_of: impl Fn(&str) -> String) -> Vec<TargetBatch<'c, R>> {
        let coordinator = self.coordinator;
        coordinator
            .model()
            .writable_targets()
            .map(|target| TargetBatch {
                target,
                index: index_of(coordinator.name_of(target)),
                saves: Vec::new(),
                deletes: Vec::new(),
                last_task: None,
            })
            .collect()
    }

    /// Reindexes `records`, through a temporary index unless the request
    /// says otherwise.
    ///
    /// The final progress, completed or failed, is kept by the coordinator
    /// under its job id.
    pub async fn reindex<'a, I>(
        &self,
        records: I,
        request: &ReindexRequest,
    ) -> SyncResult<ReindexProgress>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        if !request.temporary_index {
            return self.reindex_in_place(records, request).await;
        }
        let batch_size = self.batch_size(request.batch_size)?;
        let mut progress = self.start_job();
        let result = self
            .rebuild(records, request, batch_size, &mut progress)
            .await;
        let progress = self.finish_job(progress, result)?;
        info!(
            model = %progress.model_type,
            records = progress.total_records,
            batches = progress.batches,
            "reindex completed"
        );
        Ok(progress)
    }

    async fn rebuild<'a, I>(
        &self,
        records: I,
        request: &ReindexRequest,
        batch_size: usize,
        progress: &mut ReindexProgress,
    ) -> SyncResult<()>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        let coordinator = self.coordinator;
        let model = coordinator.model();
        if coordinator.is_disabled() {
            return Ok(());
        }

        let mut batches = self.batches(|name| format!("{name}.tmp"));
        for batch in &batches {
            let name = coordinator.name_of(batch.target);
            let remote = coordinator
                .settings()
                .remote_settings(name)
                .await?
                .unwrap_or_default();
            let desired =
                model
                    .graph()
                    .desired_settings(batch.target.id, model.targets(), coordinator.names());
            let mut scratch = remote;
            scratch.extend(desired);
            scratch.remove(REPLICAS_KEY);

            coordinator.client().delete_index(&batch.index).await?;
            coordinator
                .client()
                .set_settings(&batch.index, scratch)
                .await?;
            progress.targets.push(name.to_string());
        }

        for record in records {
            progress.total_records += 1;
            let Some(id) = model.object_id(record) else {
                continue;
            };
            let mut document: Option<Document> = None;
            for batch in batches.iter_mut() {
                if !batch.target.conditions.should_index(record) {
                    continue;
                }
                let document = document
                    .get_or_insert_with(|| with_object_id(model.document(record), &id))
                    .clone();
                batch.saves.push(document);
                if batch.saves.len() >= batch_size {
                    self.flush_saves(batch, progress).await?;
                }
            }
        }

        for batch in batches.iter_mut() {
            self.flush_saves(batch, progress).await?;
            let name = coordinator.name_of(batch.target);
            let task = match coordinator.client().move_index(&batch.index, name).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(
                        index = %name,
                        temporary = %batch.index,
                        error = %e,
                        "swap failed; temporary index left in place"
                    );
                    return Err(ReindexError::SwapFailed {
                        target: name.to_string(),
                        temporary: batch.index.clone(),
                        message: e.to_string(),
                    }
                    .into());
                }
            };
            coordinator.settle(name, task, request.wait).await?;
            self.resync_settings(batch.target).await?;
        }
        Ok(())
    }

    /// Reindexes `records` directly into the live targets.
    pub async fn reindex_in_place<'a, I>(
        &self,
        records: I,
        request: &ReindexRequest,
    ) -> SyncResult<ReindexProgress>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        let batch_size = self.batch_size(request.batch_size)?;
        let mut progress = self.start_job();
        let result = self
            .write_in_place(records, request, batch_size, &mut progress)
            .await;
        let progress = self.finish_job(progress, result)?;
        info!(
            model = %progress.model_type,
            records = progress.total_records,
            removed = progress.removed_records,
            "in-place reindex completed"
        );
        Ok(progress)
    }

    async fn write_in_place<'a, I>(
        &self,
        records: I,
        request: &ReindexRequest,
        batch_size: usize,
        progress: &mut ReindexProgress,
    ) -> SyncResult<()>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        let coordinator = self.coordinator;
        let model = coordinator.model();
        if coordinator.is_disabled() {
            return Ok(());
        }

        let mut batches = self.batches(str::to_string);
        for batch in &batches {
            coordinator.ensure_init(batch.target).await?;
            progress.targets.push(batch.index.clone());
        }

        for record in records {
            progress.total_records += 1;
            let Some(id) = model.object_id(record) else {
                continue;
            };
            let mut document: Option<Document> = None;
            for batch in batches.iter_mut() {
                if batch.target.conditions.should_index(record) {
                    let document = document
                        .get_or_insert_with(|| with_object_id(model.document(record), &id))
                        .clone();
                    batch.saves.push(document);
                    if batch.saves.len() >= batch_size {
                        self.flush_saves(batch, progress).await?;
                    }
                } else if batch.target.conditions.is_declared() {
                    batch.deletes.push(id.clone());
                    if batch.deletes.len() >= batch_size {
                        self.flush_deletes(batch, progress).await?;
                    }
                }
            }
        }

        for batch in batches.iter_mut() {
            self.flush_saves(batch, progress).await?;
            self.flush_deletes(batch, progress).await?;
            if let Some(task) = batch.last_task {
                coordinator.settle(&batch.index, task, request.wait).await?;
            }
        }
        Ok(())
    }

    fn start_job(&self) -> ReindexProgress {
        let progress = ReindexProgress::new(self.coordinator.model().model_type());
        self.coordinator.record_reindex(progress.clone());
        progress
    }

    fn finish_job(
        &self,
        progress: ReindexProgress,
        result: SyncResult<()>,
    ) -> SyncResult<ReindexProgress> {
        match result {
            Ok(()) => {
                let progress = progress.finish();
                self.coordinator.record_reindex(progress.clone());
                Ok(progress)
            }
            Err(e) => {
                let progress = progress.fail(&e);
                warn!(
                    job = %progress.job_id,
                    model = %progress.model_type,
                    indexed = progress.indexed_records,
                    error = %e,
                    "reindex failed"
                );
                self.coordinator.record_reindex(progress);
                Err(e)
            }
        }
    }

    /// Saves every indexable record; never deletes. Returns the number of
    /// documents sent, summed over targets.
    pub async fn index_objects<'a, I>(&self, records: I, wait: bool) -> SyncResult<usize>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        let batch_size = self.batch_size(None)?;
        let coordinator = self.coordinator;
        let model = coordinator.model();
        let mut progress = ReindexProgress::new(model.model_type());
        if coordinator.is_disabled() {
            return Ok(0);
        }

        let mut batches = self.batches(str::to_string);
        for batch in &batches {
            coordinator.ensure_init(batch.target).await?;
        }
        for record in records {
            let Some(id) = model.object_id(record) else {
                continue;
            };
            for batch in batches.iter_mut() {
                if batch.target.conditions.should_index(record) {
                    batch
                        .saves
                        .push(with_object_id(model.document(record), &id));
                    if batch.saves.len() >= batch_size {
                        self.flush_saves(batch, &mut progress).await?;
                    }
                }
            }
        }
        for batch in batches.iter_mut() {
            self.flush_saves(batch, &mut progress).await?;
            if let Some(task) = batch.last_task {
                coordinator.settle(&batch.index, task, wait).await?;
            }
        }
        Ok(usize::try_from(progress.indexed_records).unwrap_or(usize::MAX))
    }

    async fn flush_saves(
        &self,
        batch: &mut TargetBatch<'c, R>,
        progress: &mut ReindexProgress,
    ) -> SyncResult<()> {
        if batch.saves.is_empty() {
            return Ok(());
        }
        let documents = std::mem::take(&mut batch.saves);
        let count = documents.len() as u64;
        let task = self
            .coordinator
            .client()
            .save_objects(&batch.index, documents)
            .await?;
        debug!(index = %batch.index, count, task = %task, "saved batch");
        batch.last_task = Some(task);
        progress.indexed_records += count;
        progress.batches += 1;
        Ok(())
    }

    async fn flush_deletes(
        &self,
        batch: &mut TargetBatch<'c, R>,
        progress: &mut ReindexProgress,
    ) -> SyncResult<()> {
        if batch.deletes.is_empty() {
            return Ok(());
        }
        let ids = std::mem::take(&mut batch.deletes);
        let count = ids.len() as u64;
        let task = self
            .coordinator
            .client()
            .delete_objects(&batch.index, ids)
            .await?;
        debug!(index = %batch.index, count, task = %task, "deleted batch");
        batch.last_task = Some(task);
        progress.removed_records += count;
        progress.batches += 1;
        Ok(())
    }

    /// Re-applies settings to a swapped target and its replicas.
    async fn resync_settings(&self, target: &IndexTarget<R>) -> SyncResult<()> {
        let coordinator = self.coordinator;
        let model = coordinator.model();
        let graph = model.graph();
        let replicas = graph.replicas_of(target.id).iter().map(|(id, _)| *id);
        for id in std::iter::once(target.id).chain(replicas) {
            let desired = graph.desired_settings(id, model.targets(), coordinator.names());
            let name = &coordinator.names()[id.index()];
            coordinator
                .settings()
                .sync(name, &desired, model.is_synchronous())
                .await?;
        }
        Ok(())
    }
}

impl<R> std::fmt::Debug for BatchIndexer<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchIndexer")
            .field("coordinator", self.coordinator)
            .finish()
    }
}
