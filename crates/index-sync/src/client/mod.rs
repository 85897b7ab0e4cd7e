//! The remote search API boundary.
//!
//! The engine talks to the hosted search service only through
//! [`SearchClient`]. Transport, authentication and retries belong to the
//! implementation. [`memory::InMemorySearchClient`] is a complete in-process
//! implementation used by the test suites and by hosts that want a local
//! index.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RemoteResult;
use crate::model::{Document, ObjectId};

pub use memory::{InMemorySearchClient, RemoteCall};

/// Handle of an asynchronous remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A full-text query against one index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Query text. Empty matches every object.
    #[serde(default)]
    pub query: String,

    /// Every listed tag must be present in the object's `_tags`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_filters: Vec<String>,

    /// Maximum number of hits returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits_per_page: Option<usize>,
}

impl SearchQuery {
    /// Creates a query for the given text.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Adds a tag filter.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_filters.push(tag.into());
        self
    }

    /// Limits the number of hits.
    pub fn with_hits_per_page(mut self, hits: usize) -> Self {
        self.hits_per_page = Some(hits);
        self
    }
}

/// Result of a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Matching objects in ranking order, each carrying its `objectID`.
    pub hits: Vec<Document>,

    /// Total number of matches before `hits_per_page` truncation.
    pub nb_hits: usize,
}

/// One value of a facet, as returned by a facet-value search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetHit {
    /// The facet value.
    pub value: String,

    /// The value with the matched prefix wrapped in `<em>` tags.
    pub highlighted: String,

    /// Number of matching objects carrying the value.
    pub count: usize,
}

/// Operations the engine needs from the hosted search service.
///
/// Every write returns a [`TaskId`] that [`SearchClient::wait_for_task`]
/// blocks on. Bulk writes take documents that already carry `objectID`.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Returns the settings of an index, or `IndexNotFound`.
    async fn get_settings(&self, index: &str) -> RemoteResult<Map<String, Value>>;

    /// Updates the given settings keys of an index, creating it if needed.
    async fn set_settings(&self, index: &str, settings: Map<String, Value>) -> RemoteResult<TaskId>;

    /// Adds or replaces objects.
    async fn save_objects(&self, index: &str, objects: Vec<Document>) -> RemoteResult<TaskId>;

    /// Adds or replaces one object.
    async fn save_object(&self, index: &str, object: Document) -> RemoteResult<TaskId> {
        self.save_objects(index, vec![object]).await
    }

    /// Deletes objects by id. Ids absent from the index are ignored.
    async fn delete_objects(&self, index: &str, ids: Vec<ObjectId>) -> RemoteResult<TaskId>;

    /// Deletes one object, or fails with a not-found error.
    async fn delete_object(&self, index: &str, id: &ObjectId) -> RemoteResult<TaskId>;

    /// Runs a query.
    async fn search(&self, index: &str, query: &SearchQuery) -> RemoteResult<SearchResponse>;

    /// Lists values of `facet` that match `facet_query`, counted over the
    /// objects matching `query`. The facet must be declared
    /// `searchable(<facet>)` in `attributesForFaceting`.
    async fn search_for_facet_values(
        &self,
        index: &str,
        facet: &str,
        facet_query: &str,
        query: &SearchQuery,
    ) -> RemoteResult<Vec<FacetHit>>;

    /// Fetches one object.
    async fn get_object(&self, index: &str, id: &ObjectId) -> RemoteResult<Document>;

    /// Blocks until a task has been applied.
    async fn wait_for_task(&self, index: &str, task: TaskId) -> RemoteResult<()>;

    /// Removes every object of an index, keeping its settings.
    async fn clear_objects(&self, index: &str) -> RemoteResult<TaskId>;

    /// Deletes an index.
    async fn delete_index(&self, index: &str) -> RemoteResult<TaskId>;

    /// Replaces `destination` with `source`; `source` ceases to exist.
    async fn move_index(&self, source: &str, destination: &str) -> RemoteResult<TaskId>;
}
