//! Index Sync
//!
//! Keeps hosted search indices consistent with the records of an application.
//! The engine decides *when* a record must be re-sent, *what* document to
//! send, *which* index targets it belongs to, and how index settings are
//! propagated across primary, replica, virtual replica and additional
//! indices without redundant remote calls.
//!
//! # Architecture
//!
//! - [`record`] - the [`Record`] abstraction the persistence layer implements
//! - [`model`] - per-model configuration: targets, attributes, ids, conditions
//! - [`dirty`] - dirty-state detection and the per-mutation context
//! - [`replicas`] - the replica graph and settings inheritance
//! - [`sanitize`] - HTML sanitizing of document text
//! - [`client`] - the [`SearchClient`] boundary and an in-memory implementation
//! - [`jobs`] - job descriptors handed to an external job system
//! - [`sync`] - the coordinator, settings synchronizer and batch indexer
//! - [`config`] - engine-wide configuration
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use index_sync::client::{InMemorySearchClient, SearchQuery};
//! use index_sync::config::EngineConfig;
//! use index_sync::model::{IndexSettings, ModelConfiguration};
//! use index_sync::record::MemoryRecord;
//! use index_sync::sync::SyncCoordinator;
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let model = ModelConfiguration::<MemoryRecord>::builder("Color")
//!     .index_name("Color")
//!     .attributes(["name", "short_name", "hex"])
//!     .settings(IndexSettings::new().custom_ranking(["asc(hex)"]))
//!     .build()
//!     .unwrap();
//!
//! let client = Arc::new(InMemorySearchClient::new());
//! let colors = SyncCoordinator::new(Arc::new(model), client.clone(), EngineConfig::default());
//!
//! let mut blue = MemoryRecord::new("Color")
//!     .with_field("name", json!("blue"))
//!     .with_field("short_name", json!("b"))
//!     .with_field("hex", json!(0xFF));
//! blue.save(1);
//! colors.on_create(&blue).await.unwrap();
//!
//! let hits = colors.raw_search(&SearchQuery::new("blu"), None).await.unwrap();
//! assert_eq!(hits.nb_hits, 1);
//! assert_eq!(hits.hits[0]["objectID"], "1");
//! # });
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod dirty;
pub mod error;
pub mod jobs;
pub mod model;
pub mod record;
pub mod replicas;
pub mod sanitize;
pub mod sync;

pub use client::SearchClient;
pub use config::EngineConfig;
pub use error::{SyncError, SyncResult};
pub use model::{ModelConfiguration, ModelConfigurationBuilder};
pub use record::{MemoryRecord, Record};
pub use sync::SyncCoordinator;
