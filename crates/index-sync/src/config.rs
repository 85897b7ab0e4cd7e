//! Engine-wide configuration.
//!
//! [`EngineConfig`] carries the settings shared by every model wired to one
//! engine: the environment suffix used for per-environment index names, the
//! queue name stamped on enqueued jobs, default batch sizes and the global
//! switches. It deserializes from any serde format the host application uses.
//!
//! # Example
//!
//! ```
//! use index_sync::config::EngineConfig;
//!
//! let config: EngineConfig = serde_json::from_value(serde_json::json!({
//!     "environment": "test",
//!     "task_wait_timeout": "30s"
//! }))
//! .unwrap();
//!
//! assert_eq!(config.environment, "test");
//! assert_eq!(config.batch_size, 1000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by all models of one engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Suffix appended to per-environment index names.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Queue name stamped on every enqueued job.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Default number of documents per bulk request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Whether models check remote settings lazily on first use.
    #[serde(default = "default_check_settings")]
    pub check_settings: bool,

    /// Global kill switch: no remote call is issued by any model.
    #[serde(default)]
    pub disable_indexing: bool,

    /// Upper bound on a single wait for remote task completion.
    #[serde(with = "humantime_serde", default = "default_task_wait_timeout")]
    pub task_wait_timeout: Duration,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_queue_name() -> String {
    "search_indexing".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_check_settings() -> bool {
    true
}

fn default_task_wait_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            queue_name: default_queue_name(),
            batch_size: default_batch_size(),
            check_settings: default_check_settings(),
            disable_indexing: false,
            task_wait_timeout: default_task_wait_timeout(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for the given environment.
    pub fn for_environment(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Sets the default batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Disables all indexing.
    pub fn disabled(mut self) -> Self {
        self.disable_indexing = true;
        self
    }

    /// Resolves an index name, appending the environment when requested.
    pub fn resolve_index_name(&self, declared: &str, per_environment: bool) -> String {
        if per_environment {
            format!("{}_{}", declared, self.environment)
        } else {
            declared.to_string()
        }
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.environment, "development");
        assert_eq!(config.queue_name, "search_indexing");
        assert_eq!(config.batch_size, 1000);
        assert!(config.check_settings);
        assert!(!config.disable_indexing);
        assert_eq!(config.task_wait_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "environment": "staging",
            "queue_name": "something_else",
            "task_wait_timeout": "1m 30s"
        }))
        .unwrap();

        assert_eq!(config.environment, "staging");
        assert_eq!(config.queue_name, "something_else");
        assert_eq!(config.task_wait_timeout, Duration::from_secs(90));
        assert_eq!(config.batch_size, 1000);
    }

    #[test]
    fn test_serialize_roundtrip_duration_format() {
        let config = EngineConfig::for_environment("test");
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["task_wait_timeout"], "5m");
    }

    #[test]
    fn test_resolve_index_name() {
        let config = EngineConfig::for_environment("test");
        assert_eq!(config.resolve_index_name("Color", true), "Color_test");
        assert_eq!(config.resolve_index_name("Color", false), "Color");
    }
}
