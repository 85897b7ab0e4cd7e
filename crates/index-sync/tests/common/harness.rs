//! Test harness wiring a model to an in-memory search client.
//!
//! [`TestContext`] owns the client and the coordinator and drives records
//! through the same create / update / destroy sequence a persistence
//! framework would.

use std::sync::Arc;

use serde_json::{Map, Value};

use index_sync::client::{InMemorySearchClient, RemoteCall, SearchQuery, SearchResponse};
use index_sync::config::EngineConfig;
use index_sync::record::MemoryRecord;
use index_sync::sync::{SyncCoordinator, TargetOutcome};

use super::fixtures::Model;

/// Environment every test context runs in.
pub const TEST_ENVIRONMENT: &str = "test";

/// A coordinator bound to an in-memory client.
pub struct TestContext {
    /// The in-memory search service.
    pub client: Arc<InMemorySearchClient>,
    /// The coordinator under test.
    pub coordinator: SyncCoordinator<MemoryRecord>,
}

impl TestContext {
    /// Creates a context with a fresh client and the test environment.
    pub fn new(model: Model) -> Self {
        Self::with_client(model, Arc::new(InMemorySearchClient::new()))
    }

    /// Creates a context over an existing client.
    pub fn with_client(model: Model, client: Arc<InMemorySearchClient>) -> Self {
        Self::with_config(model, client, EngineConfig::for_environment(TEST_ENVIRONMENT))
    }

    /// Creates a context with an explicit engine configuration.
    pub fn with_config(
        model: Model,
        client: Arc<InMemorySearchClient>,
        config: EngineConfig,
    ) -> Self {
        let coordinator = SyncCoordinator::new(Arc::new(model), client.clone(), config);
        Self {
            client,
            coordinator,
        }
    }

    /// Resolved name of the primary index.
    pub fn index(&self) -> String {
        self.coordinator.index_name().to_string()
    }

    /// Resolved name of a declared target.
    pub fn target(&self, declared: &str) -> String {
        self.coordinator
            .target_name(declared)
            .unwrap_or_else(|| panic!("model declares no index named {declared}"))
            .to_string()
    }

    /// Saves the record under `id` and runs the create hook.
    pub async fn create(&self, record: &mut MemoryRecord, id: i64) -> Vec<TargetOutcome> {
        record.save(id);
        self.coordinator
            .on_create(record)
            .await
            .expect("create hook failed")
    }

    /// Applies `change` to the record, runs the update hook and commits.
    pub async fn update<F>(&self, record: &mut MemoryRecord, change: F) -> Vec<TargetOutcome>
    where
        F: FnOnce(&mut MemoryRecord),
    {
        let previous = record.clone();
        change(record);
        let outcomes = self
            .coordinator
            .on_update(&previous, record)
            .await
            .expect("update hook failed");
        record.commit();
        outcomes
    }

    /// Removes the record and runs the destroy hook.
    pub async fn destroy(&self, record: &mut MemoryRecord) -> Vec<TargetOutcome> {
        record.mark_destroyed();
        self.coordinator
            .on_destroy(record)
            .await
            .expect("destroy hook failed")
    }

    /// Searches the primary index, or a declared target.
    pub async fn search(&self, query: &str, declared: Option<&str>) -> SearchResponse {
        self.coordinator
            .raw_search(&SearchQuery::new(query), declared)
            .await
            .expect("search failed")
    }

    /// Object ids of the hits, in rank order.
    pub async fn hit_ids(&self, query: &str, declared: Option<&str>) -> Vec<String> {
        self.search(query, declared)
            .await
            .hits
            .iter()
            .filter_map(|hit| hit.get("objectID").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Remote settings of a resolved index name.
    pub fn settings_of(&self, index: &str) -> Map<String, Value> {
        self.client.settings(index).unwrap_or_default()
    }

    /// Every save or delete issued so far.
    pub fn object_writes(&self) -> Vec<RemoteCall> {
        self.client
            .calls()
            .into_iter()
            .filter(RemoteCall::is_object_write)
            .collect()
    }

    /// Every settings write issued so far.
    pub fn settings_writes(&self) -> Vec<RemoteCall> {
        self.client
            .calls()
            .into_iter()
            .filter(|call| matches!(call, RemoteCall::SetSettings { .. }))
            .collect()
    }
}
