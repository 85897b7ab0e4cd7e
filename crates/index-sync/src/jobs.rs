//! Background job handoff.
//!
//! When a model enqueues instead of calling the remote API inline, each
//! target operation becomes an [`IndexJob`] handed to a [`JobDispatcher`].
//! Retry, ordering and worker concurrency belong to the job system; the
//! engine only needs the dispatcher to accept the job.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Operation carried by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOperation {
    /// Save the record's document.
    Save,
    /// Delete the record's document.
    Delete,
}

impl std::fmt::Display for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOperation::Save => write!(f, "save"),
            JobOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Serializable descriptor of one deferred index operation.
///
/// The job system resolves `record_id` (the record's primary key) back to a
/// live record when the job runs; a record that no longer exists turns the
/// job into a delete of `object_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexJob {
    /// Unique job identifier.
    pub job_id: Uuid,
    /// Model type of the record.
    pub model_type: String,
    /// Primary key of the record, as the persistence layer knows it.
    pub record_id: Option<String>,
    /// Object id of the document in the target index.
    pub object_id: String,
    /// Operation to perform.
    pub operation: JobOperation,
    /// Resolved name of the target index.
    pub target_name: String,
    /// Queue the job is enqueued on.
    pub queue: String,
    /// When the job was created.
    pub enqueued_at: DateTime<Utc>,
}

impl IndexJob {
    /// Creates a new job descriptor for the document `object_id`.
    pub fn new(
        model_type: impl Into<String>,
        object_id: impl Into<String>,
        operation: JobOperation,
        target_name: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            model_type: model_type.into(),
            record_id: None,
            object_id: object_id.into(),
            operation,
            target_name: target_name.into(),
            queue: queue.into(),
            enqueued_at: Utc::now(),
        }
    }

    /// Sets the primary key the job system resolves the record by.
    pub fn with_record_id(mut self, record_id: Option<String>) -> Self {
        self.record_id = record_id;
        self
    }
}

/// The external job system.
pub trait JobDispatcher: Send + Sync {
    /// Hands a job to the job system.
    fn enqueue(&self, job: IndexJob) -> Result<(), DispatchError>;
}

/// Dispatcher that keeps jobs in memory, optionally rejecting them.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<IndexJob>>,
    rejection: Option<String>,
}

impl RecordingDispatcher {
    /// Creates a dispatcher that accepts every job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher that rejects every job with `message`.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            rejection: Some(message.into()),
        }
    }

    /// Returns the accepted jobs.
    pub fn jobs(&self) -> Vec<IndexJob> {
        self.jobs.lock().clone()
    }

    /// Removes and returns the accepted jobs.
    pub fn take(&self) -> Vec<IndexJob> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

impl JobDispatcher for RecordingDispatcher {
    fn enqueue(&self, job: IndexJob) -> Result<(), DispatchError> {
        if let Some(message) = &self.rejection {
            return Err(DispatchError::Rejected {
                model: job.model_type,
                object_id: job.object_id,
                queue: job.queue,
                message: message.clone(),
            });
        }
        self.jobs.lock().push(job);
        Ok(())
    }
}
