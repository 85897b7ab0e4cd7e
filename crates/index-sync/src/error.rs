//! Error types for the index synchronization engine.
//!
//! Errors are split by where they originate: configuration problems found while
//! building a model, caller precondition failures on explicit index operations,
//! failures reported by the remote search API, reindex swap failures, and job
//! dispatch failures. Engine-local decisions (indexability, dirtiness, settings
//! diffs) never produce an error.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Model configuration errors
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Explicit index operation on a record that cannot be indexed
    #[error(transparent)]
    NotIndexable(#[from] NotIndexableError),

    /// Remote search API errors
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Bulk reindex errors
    #[error(transparent)]
    Reindex(#[from] ReindexError),

    /// Job dispatch errors
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Document serialization errors
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl SyncError {
    /// Returns true if this error was reported by the remote search API.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Remote(_))
    }
}

/// Errors raised while building or validating a model configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The model declares no index at all.
    #[error("model '{model}' declares no index configuration")]
    MissingIndexBlock { model: String },

    /// The model declares no primary index.
    #[error("model '{model}' has no primary index")]
    NoPrimaryIndex { model: String },

    /// An index name is empty.
    #[error("model '{model}' declares an index with an empty name")]
    EmptyIndexName { model: String },

    /// Two targets of the same model resolve to the same index name.
    #[error("model '{model}' declares index '{index}' more than once")]
    DuplicateIndex { model: String, index: String },

    /// A virtual replica was declared as inheriting primary settings.
    #[error("replica '{replica}' of model '{model}' is virtual and cannot inherit settings")]
    ContradictoryInheritance { model: String, replica: String },

    /// A replica references a parent that is not a primary or additional index.
    #[error("replica '{replica}' of model '{model}' has no owning primary index")]
    OrphanReplica { model: String, replica: String },

    /// A batch size of zero was requested.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// A target name was requested that the model does not declare.
    #[error("model '{model}' declares no index named '{index}'")]
    UnknownTarget { model: String, index: String },

    /// A built-in pattern failed to compile.
    #[error("invalid pattern: {message}")]
    InvalidPattern { message: String },
}

impl From<regex::Error> for ConfigurationError {
    fn from(err: regex::Error) -> Self {
        ConfigurationError::InvalidPattern {
            message: err.to_string(),
        }
    }
}

/// A caller asked for an explicit save/delete on a record that is not indexable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotIndexableError {
    /// The record has not been persisted yet.
    #[error("cannot index a record of '{model}' that has not been persisted")]
    NotPersisted { model: String },

    /// The record has no resolvable object id.
    #[error("cannot index a record of '{model}' without an object id")]
    MissingObjectId { model: String },

    /// The record fails the indexability predicate for the target.
    #[error("record {object_id} of '{model}' is not indexable in '{index}'")]
    ConditionFailed {
        model: String,
        object_id: String,
        index: String,
    },
}

/// Errors reported by the remote search API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The index does not exist.
    #[error("index does not exist: {index}")]
    IndexNotFound { index: String },

    /// The object does not exist in the index.
    #[error("object {object_id} does not exist in {index}")]
    ObjectNotFound { index: String, object_id: String },

    /// The API rejected the request.
    #[error("request to {index} rejected with status {status}: {message}")]
    Http {
        index: String,
        status: u16,
        message: String,
    },

    /// The request, or a wait on its task, did not complete in time.
    #[error("timed out after {timeout_ms}ms waiting on {index}")]
    Timeout { index: String, timeout_ms: u64 },

    /// The request could not be delivered.
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl RemoteError {
    /// Returns true if the error only says that the target is already absent.
    ///
    /// Deletes treat these as success.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RemoteError::IndexNotFound { .. } | RemoteError::ObjectNotFound { .. }
        )
    }
}

/// Errors related to bulk reindexing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReindexError {
    /// Promoting the temporary index failed; the temporary index is left in place.
    #[error("failed to swap temporary index {temporary} into {target}: {message}")]
    SwapFailed {
        target: String,
        temporary: String,
        message: String,
    },
}

/// Errors returned by the external job dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher refused the job.
    #[error("job for {model}/{object_id} rejected by queue '{queue}': {message}")]
    Rejected {
        model: String,
        object_id: String,
        queue: String,
        message: String,
    },
}

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization {
            message: err.to_string(),
        }
    }
}
