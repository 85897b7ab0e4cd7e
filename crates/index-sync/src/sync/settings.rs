//! Remote settings synchronization.
//!
//! Settings are pushed only when the desired map differs from the remote
//! copy (see [`settings_changed`]). The lazy per-index check performed before
//! the first write runs at most once per index name until
//! [`SettingsSynchronizer::reset`] is called.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::client::{SearchClient, TaskId};
use crate::error::{RemoteError, RemoteResult};
use crate::model::settings_changed;

/// What a settings sync did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOutcome {
    /// Remote settings already matched; nothing was written.
    Unchanged,
    /// Settings were pushed.
    Updated(TaskId),
}

impl SettingsOutcome {
    /// Whether settings were written.
    pub fn is_updated(&self) -> bool {
        matches!(self, SettingsOutcome::Updated(_))
    }
}

/// Waits for a task, bounded by `timeout`.
pub(crate) async fn wait_for_task(
    client: &dyn SearchClient,
    index: &str,
    task: TaskId,
    timeout: Duration,
) -> RemoteResult<()> {
    match tokio::time::timeout(timeout, client.wait_for_task(index, task)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            index: index.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Diffs and pushes index settings.
pub struct SettingsSynchronizer {
    client: Arc<dyn SearchClient>,
    task_timeout: Duration,
    checked: Mutex<HashSet<String>>,
}

impl SettingsSynchronizer {
    /// Creates a synchronizer over a client.
    pub fn new(client: Arc<dyn SearchClient>, task_timeout: Duration) -> Self {
        Self {
            client,
            task_timeout,
            checked: Mutex::new(HashSet::new()),
        }
    }

    /// Fetches remote settings; `None` when the index does not exist.
    pub async fn remote_settings(&self, index: &str) -> RemoteResult<Option<Map<String, Value>>> {
        match self.client.get_settings(index).await {
            Ok(settings) => Ok(Some(settings)),
            Err(RemoteError::IndexNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Pushes `desired` to `index` if it differs from the remote copy.
    ///
    /// With `wait`, returns only once the remote confirms the update.
    pub async fn sync(
        &self,
        index: &str,
        desired: &Map<String, Value>,
        wait: bool,
    ) -> RemoteResult<SettingsOutcome> {
        let remote = self.remote_settings(index).await?;
        if !settings_changed(remote.as_ref(), desired) {
            debug!(index, "settings unchanged");
            self.checked.lock().insert(index.to_string());
            return Ok(SettingsOutcome::Unchanged);
        }

        let task = self.client.set_settings(index, desired.clone()).await?;
        info!(index, task = %task, keys = desired.len(), "pushed index settings");
        if wait {
            wait_for_task(self.client.as_ref(), index, task, self.task_timeout).await?;
        }
        self.checked.lock().insert(index.to_string());
        Ok(SettingsOutcome::Updated(task))
    }

    /// Like [`sync`](Self::sync), but only the first time for each index.
    pub async fn ensure_once(
        &self,
        index: &str,
        desired: &Map<String, Value>,
        wait: bool,
    ) -> RemoteResult<SettingsOutcome> {
        if self.is_checked(index) {
            return Ok(SettingsOutcome::Unchanged);
        }
        self.sync(index, desired, wait).await
    }

    /// Whether the index was already checked.
    pub fn is_checked(&self, index: &str) -> bool {
        self.checked.lock().contains(index)
    }

    /// Forgets which indices were checked.
    pub fn reset(&self) {
        self.checked.lock().clear();
    }
}

impl std::fmt::Debug for SettingsSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsSynchronizer")
            .field("task_timeout", &self.task_timeout)
            .field("checked", &self.checked.lock().len())
            .finish()
    }
}
