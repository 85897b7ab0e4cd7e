//! Settings synchronization and replica topology tests.
//!
//! These tests drive settings through the coordinator against the in-memory
//! client and inspect what each remote index ends up with.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::*;
use index_sync::client::{InMemorySearchClient, RemoteCall};
use index_sync::config::EngineConfig;
use index_sync::error::{ConfigurationError, SyncError};
use index_sync::model::{IndexDeclaration, ModelConfiguration, REPLICAS_KEY, Toggle};
use index_sync::record::MemoryRecord;
use index_sync::sync::{ReindexRequest, SettingsOutcome, SkipReason, TargetAction};

fn get_settings_calls(ctx: &TestContext, index: &str) -> usize {
    ctx.client
        .calls()
        .iter()
        .filter(|call| matches!(call, RemoteCall::GetSettings { index: i } if i == index))
        .count()
}

// ============================================================================
// Diff & Idempotence Tests
// ============================================================================

/// A second sync pass over unchanged declarations writes nothing.
#[tokio::test]
async fn test_ensure_settings_is_idempotent() {
    let ctx = TestContext::new(city_model());

    let first = ctx.coordinator.ensure_settings(None).await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|(_, outcome)| outcome.is_updated()));
    assert_eq!(ctx.settings_writes().len(), 3);

    let second = ctx.coordinator.ensure_settings(None).await.unwrap();
    assert!(
        second
            .iter()
            .all(|(_, outcome)| *outcome == SettingsOutcome::Unchanged)
    );
    assert_eq!(ctx.settings_writes().len(), 3);
}

/// Remote settings that already match cost a read and no write.
#[tokio::test]
async fn test_matching_remote_settings_are_not_rewritten() {
    let client = Arc::new(InMemorySearchClient::new());
    client.seed_settings(
        "Color_test",
        json!({
            "searchableAttributes": ["name"],
            "attributesForFaceting": ["searchable(short_name)"],
            "customRanking": ["asc(hex)"],
            "replicas": null,
            "attributesToSnippet": ["unrelated"]
        })
        .as_object()
        .cloned()
        .unwrap(),
    );
    let ctx = TestContext::with_client(color_model(), client);

    let outcomes = ctx.coordinator.ensure_settings(None).await.unwrap();
    assert_eq!(outcomes, vec![("Color_test".to_string(), SettingsOutcome::Unchanged)]);
    assert!(ctx.settings_writes().is_empty());
}

/// A changed declaration produces exactly one write for the index.
#[tokio::test]
async fn test_changed_declaration_writes_once() {
    let client = Arc::new(InMemorySearchClient::new());
    let first = TestContext::with_client(
        forward_to_replicas_model("first_value", false),
        client.clone(),
    );
    first.coordinator.ensure_settings(Some("ForwardToReplicas")).await.unwrap();
    client.reset_calls();

    let second = TestContext::with_client(forward_to_replicas_model("second_value", false), client);
    let outcomes = second
        .coordinator
        .ensure_settings(Some("ForwardToReplicas"))
        .await
        .unwrap();
    assert!(outcomes[0].1.is_updated());
    assert_eq!(second.settings_writes().len(), 1);
    assert_eq!(
        second.settings_of("ForwardToReplicas")["searchableAttributes"],
        json!(["second_value"])
    );
}

// ============================================================================
// Lazy Check Tests
// ============================================================================

/// Settings are fetched before the first write and never again.
#[tokio::test]
async fn test_settings_checked_once_before_first_write() {
    let ctx = TestContext::new(color_model());

    ctx.create(&mut color("blue", "b", 0xFF), 1).await;
    ctx.create(&mut color("red", "r", 0xFF0000), 2).await;

    assert_eq!(get_settings_calls(&ctx, "Color_test"), 1);
    assert_eq!(ctx.settings_writes().len(), 1);
    assert_eq!(ctx.client.objects("Color_test").len(), 2);
}

/// The lazy check covers the replicas of the written target.
#[tokio::test]
async fn test_lazy_check_initializes_replicas() {
    let ctx = TestContext::new(city_model());
    ctx.create(&mut city("San Francisco", "USA", 1, 1), 1).await;

    for index in ["City_test", "City_replica1_test", "City_replica2_test"] {
        assert_eq!(get_settings_calls(&ctx, index), 1, "{index}");
        assert!(ctx.client.has_index(index), "{index}");
    }
}

/// Resetting the cache makes the next write check again.
#[tokio::test]
async fn test_reset_settings_cache_rechecks() {
    let ctx = TestContext::new(color_model());
    ctx.create(&mut color("blue", "b", 1), 1).await;
    ctx.coordinator.reset_settings_cache();
    ctx.create(&mut color("red", "r", 2), 2).await;

    assert_eq!(get_settings_calls(&ctx, "Color_test"), 2);
    assert_eq!(ctx.settings_writes().len(), 1);
}

/// A model that opts out of settings checks never reads them on write.
#[tokio::test]
async fn test_check_settings_disabled_skips_lazy_check() {
    let ctx = TestContext::new(phone_model());
    ctx.create(&mut named("Phone", "pixel"), 1).await;

    assert_eq!(get_settings_calls(&ctx, "Phone"), 0);
    assert!(ctx.settings_writes().is_empty());
    assert!(ctx.client.object("Phone", "1").is_some());
}

/// The engine-wide default applies when the model does not say.
#[tokio::test]
async fn test_engine_check_settings_default() {
    let mut config = EngineConfig::for_environment("test");
    config.check_settings = false;
    let ctx = TestContext::with_config(
        color_model(),
        Arc::new(InMemorySearchClient::new()),
        config,
    );
    ctx.create(&mut color("blue", "b", 1), 1).await;

    assert_eq!(get_settings_calls(&ctx, "Color_test"), 0);
}

// ============================================================================
// Replica Tests
// ============================================================================

/// Primary and replica each keep their own ranking; nothing is inherited.
#[tokio::test]
async fn test_standalone_replicas_keep_their_own_settings() {
    let client = Arc::new(InMemorySearchClient::new());
    client.seed_settings(
        "City_replica2_test",
        json!({"customRanking": ["desc(d)"]}).as_object().cloned().unwrap(),
    );
    let ctx = TestContext::with_client(city_model(), client);
    ctx.coordinator.ensure_settings(None).await.unwrap();

    let primary = ctx.settings_of("City_test");
    assert_eq!(primary["customRanking"], json!(["desc(b)"]));
    assert_eq!(
        primary[REPLICAS_KEY],
        json!(["City_replica1_test", "City_replica2_test"])
    );

    let replica1 = ctx.settings_of("City_replica1_test");
    assert_eq!(replica1["customRanking"], json!(["asc(a)"]));
    assert_eq!(replica1["searchableAttributes"], json!(["country"]));
    assert!(!replica1.contains_key(REPLICAS_KEY));

    let replica2 = ctx.settings_of("City_replica2_test");
    assert_eq!(replica2["customRanking"], json!(["asc(a)", "desc(c)"]));
}

/// Replicas serve the primary's documents with their own ranking.
#[tokio::test]
async fn test_replica_search_uses_its_ranking() {
    let ctx = TestContext::new(city_model());
    ctx.create(&mut city("San Francisco", "USA", 2, 2), 1).await;
    ctx.create(&mut city("Mountain View", "USA", 1, 1), 2).await;

    assert_eq!(ctx.hit_ids("", None).await, vec!["1", "2"]);
    assert_eq!(ctx.hit_ids("", Some("City_replica1")).await, vec!["2", "1"]);
    assert_eq!(ctx.hit_ids("usa", Some("City_replica1")).await.len(), 2);

    ctx.client.reset_calls();
    ctx.hit_ids("", Some("City_replica2")).await;
    assert!(ctx.object_writes().is_empty());
}

/// Writes go to the primary only; replicas are never written directly.
#[tokio::test]
async fn test_replicas_receive_no_object_writes() {
    let ctx = TestContext::new(city_model());
    ctx.create(&mut city("Paris", "France", 1, 1), 1).await;

    let indices: Vec<String> = ctx
        .object_writes()
        .iter()
        .map(|call| call.index().to_string())
        .collect();
    assert_eq!(indices, vec!["City_test"]);
}

/// An inheriting replica follows the primary's searchable attributes; a
/// standalone one never receives them.
#[tokio::test]
async fn test_inherited_replica_follows_primary() {
    let client = Arc::new(InMemorySearchClient::new());
    let first = TestContext::with_client(
        forward_to_replicas_model("first_value", false),
        client.clone(),
    );
    first.coordinator.ensure_settings(None).await.unwrap();

    let primary = first.settings_of("ForwardToReplicas");
    assert_eq!(primary["searchableAttributes"], json!(["first_value"]));
    assert_eq!(primary["attributesToHighlight"], json!(["primary_highlight"]));

    let plain = first.settings_of("ForwardToReplicas_replica");
    assert!(!plain.contains_key("searchableAttributes"));
    assert_eq!(plain["attributesToHighlight"], json!(["replica_highlight"]));

    let inherited = first.settings_of("ForwardToReplicas_replica_inherited");
    assert_eq!(inherited["searchableAttributes"], json!(["first_value"]));
    assert_eq!(inherited["attributesToHighlight"], json!(["replica_highlight"]));

    let second = TestContext::with_client(forward_to_replicas_model("second_value", true), client);
    second.coordinator.ensure_settings(None).await.unwrap();

    for replica in ["ForwardToReplicas_replica", "ForwardToReplicas_replica_inherited"] {
        let settings = second.settings_of(replica);
        assert_eq!(settings["searchableAttributes"], json!(["second_value"]), "{replica}");
        assert_eq!(settings["attributesToHighlight"], json!(["replica_highlight"]), "{replica}");
    }
}

/// Virtual replicas are listed wrapped and never publish a replicas list.
#[tokio::test]
async fn test_virtual_replica_listing() {
    let ctx = TestContext::new(virtual_replicas_model());
    ctx.coordinator.ensure_settings(None).await.unwrap();

    let primary = ctx.settings_of("VirtualReplica_primary");
    assert_eq!(primary[REPLICAS_KEY], json!(["virtual(VirtualReplica_replica)"]));

    let replica = ctx.settings_of("VirtualReplica_replica");
    assert!(!replica.contains_key(REPLICAS_KEY));
    assert_eq!(replica["customRanking"], json!(["desc(name)"]));
}

/// A virtual replica serves the primary's documents in reverse order.
#[tokio::test]
async fn test_virtual_replica_search() {
    let ctx = TestContext::new(virtual_replicas_model());
    ctx.create(&mut named("VirtualReplicas", "Alpha"), 1).await;
    ctx.create(&mut named("VirtualReplicas", "Beta"), 2).await;

    assert_eq!(ctx.hit_ids("", None).await, vec!["1", "2"]);
    assert_eq!(
        ctx.hit_ids("", Some("VirtualReplica_replica")).await,
        vec!["2", "1"]
    );
}

/// Replicas of an additional index hang off that index, not the primary.
#[tokio::test]
async fn test_additional_index_owns_its_replica() {
    let ctx = TestContext::new(sub_replicas_model());
    ctx.create(&mut named("SubReplicas", "Alpha"), 1).await;
    ctx.create(&mut named("SubReplicas", "Beta"), 2).await;

    assert_eq!(ctx.settings_of("SubReplicas")[REPLICAS_KEY], json!([]));
    assert_eq!(
        ctx.settings_of("Additional_Index_test")[REPLICAS_KEY],
        json!(["Replica_Index_test"])
    );

    let written: Vec<String> = ctx
        .object_writes()
        .iter()
        .map(|call| call.index().to_string())
        .collect();
    assert!(written.iter().all(|i| i != "Replica_Index_test"));
    assert_eq!(ctx.client.objects("Additional_Index_test").len(), 2);

    assert_eq!(ctx.hit_ids("", Some("Replica_Index")).await, vec!["2", "1"]);
}

/// Removing every replica publishes an empty list.
#[tokio::test]
async fn test_dropping_replicas_publishes_empty_list() {
    let client = Arc::new(InMemorySearchClient::new());
    let before = TestContext::with_client(city_model(), client.clone());
    before.coordinator.ensure_settings(None).await.unwrap();

    let without_replicas = ModelConfiguration::<MemoryRecord>::builder("City")
        .index_name("City")
        .per_environment(true)
        .build()
        .unwrap();
    let after = TestContext::with_client(without_replicas, client);
    let outcomes = after.coordinator.ensure_settings(None).await.unwrap();

    assert!(outcomes[0].1.is_updated());
    assert_eq!(after.settings_of("City_test")[REPLICAS_KEY], json!([]));
}

// ============================================================================
// Configuration Validation Tests
// ============================================================================

/// A virtual replica cannot inherit its owner's settings.
#[test]
fn test_virtual_inherit_is_rejected() {
    let err = ModelConfiguration::<MemoryRecord>::builder("Broken")
        .index_name("Broken")
        .replica(IndexDeclaration::new("Broken_replica").virtual_replica().inherit())
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::ContradictoryInheritance {
            model: "Broken".to_string(),
            replica: "Broken_replica".to_string(),
        }
    );
}

/// A model with no declared index is rejected.
#[test]
fn test_missing_index_block_is_rejected() {
    let err = ModelConfiguration::<MemoryRecord>::builder("MisconfiguredBlock")
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::MissingIndexBlock { .. }));
}

/// Asking for an undeclared target is an error.
#[tokio::test]
async fn test_ensure_settings_unknown_target() {
    let ctx = TestContext::new(color_model());
    let err = ctx
        .coordinator
        .ensure_settings(Some("Nope"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Configuration(ConfigurationError::UnknownTarget { .. })
    ));
}

// ============================================================================
// Disabled Indexing Tests
// ============================================================================

/// A disabled model never talks to the remote service, settings included.
#[tokio::test]
async fn test_disabled_model_issues_no_calls() {
    for toggle in [Toggle::from(true), Toggle::deferred(|| true)] {
        let ctx = TestContext::new(disabled_model(toggle));
        let mut record = named("DisabledIndexing", "quiet");

        let outcomes = ctx.create(&mut record, 1).await;
        assert_eq!(outcomes[0].action, TargetAction::Skipped(SkipReason::Disabled));
        assert!(ctx.coordinator.ensure_settings(None).await.unwrap().is_empty());
        assert_eq!(ctx.search("quiet", None).await.nb_hits, 0);
        ctx.coordinator
            .reindex([&record], &ReindexRequest::temporary())
            .await
            .unwrap();
        ctx.destroy(&mut record).await;

        assert!(ctx.client.calls().is_empty());
    }
}

/// The engine-wide kill switch disables every model.
#[tokio::test]
async fn test_engine_kill_switch() {
    let ctx = TestContext::with_config(
        color_model(),
        Arc::new(InMemorySearchClient::new()),
        EngineConfig::for_environment("test").disabled(),
    );
    ctx.create(&mut color("blue", "b", 1), 1).await;
    ctx.coordinator.clear_index(true).await.unwrap();

    assert!(ctx.client.calls().is_empty());
}

/// A deferred toggle is read on every call.
#[tokio::test]
async fn test_deferred_toggle_is_reevaluated() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let disabled = Arc::new(AtomicBool::new(true));
    let flag = disabled.clone();
    let ctx = TestContext::new(disabled_model(Toggle::deferred(move || {
        flag.load(Ordering::SeqCst)
    })));

    ctx.create(&mut named("DisabledIndexing", "first"), 1).await;
    assert!(ctx.client.calls().is_empty());

    disabled.store(false, Ordering::SeqCst);
    ctx.create(&mut named("DisabledIndexing", "second"), 2).await;
    assert!(ctx.client.object("DisabledIndexing", "2").is_some());
}
