//! Test fixtures for the synchronization engine.
//!
//! This module provides the model configurations exercised by the
//! integration tests, along with builders for the records they index.

use std::sync::Arc;

use serde_json::{Value, json};

use index_sync::dirty::{ChangeDetection, DirtyStrategy};
use index_sync::jobs::JobDispatcher;
use index_sync::model::{
    EnqueuePolicy, IdStrategy, IndexDeclaration, IndexSettings, ModelConfiguration, Predicate,
    Toggle,
};
use index_sync::record::{MemoryRecord, Record, blank, truthy};

/// Model configuration over in-memory records.
pub type Model = ModelConfiguration<MemoryRecord>;

// ============================================================================
// Model Fixtures
// ============================================================================

/// Colors: stored attributes, a tag per name, ascending `hex` ranking.
///
/// Changes to `hex`, `short_name` and the tags are declared undetectable
/// by the model, so only `name` drives reindexing.
pub fn color_model() -> Model {
    ModelConfiguration::builder("Color")
        .index_name("Color")
        .per_environment(true)
        .synchronous(true)
        .settings(
            IndexSettings::new()
                .searchable_attributes(["name"])
                .attributes_for_faceting(["searchable(short_name)"])
                .custom_ranking(["asc(hex)"]),
        )
        .tags(&["name"], |c: &MemoryRecord| {
            c.field("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .into_iter()
                .collect()
        })
        .change_detection("hex", ChangeDetection::never())
        .change_detection("short_name", ChangeDetection::never())
        .change_detection("_tags", ChangeDetection::never())
        .build()
        .expect("color model")
}

/// Cities: a primary ranked by `desc(b)` with two standalone replicas.
pub fn city_model() -> Model {
    ModelConfiguration::builder("City")
        .index_name("City")
        .per_environment(true)
        .synchronous(true)
        .settings(IndexSettings::new().custom_ranking(["desc(b)"]))
        .geoloc(&["lat", "lng", "gl_array"], |c: &MemoryRecord| {
            let lat = c.field("lat").filter(|v| !v.is_null());
            let lng = c.field("lng").filter(|v| !v.is_null());
            match (lat, lng) {
                (Some(lat), Some(lng)) => Some(json!({"lat": lat, "lng": lng})),
                _ => c.field("gl_array").filter(|v| !v.is_null()),
            }
        })
        .add_computed("a_null_lat", &[], |_: &MemoryRecord| Value::Null)
        .add_computed("a_lng", &[], |_: &MemoryRecord| json!(1.2345678))
        .replica(
            IndexDeclaration::new("City_replica1")
                .per_environment(true)
                .settings(
                    IndexSettings::new()
                        .searchable_attributes(["country"])
                        .custom_ranking(["asc(a)"]),
                ),
        )
        .replica(
            IndexDeclaration::new("City_replica2")
                .per_environment(true)
                .settings(IndexSettings::new().custom_ranking(["asc(a)", "desc(c)"])),
        )
        .build()
        .expect("city model")
}

/// Primary with one standalone and one inheriting replica.
///
/// `searchable` is the primary's searchable attribute; `inherit_all` turns
/// the standalone replica into an inheriting one as well.
pub fn forward_to_replicas_model(searchable: &str, inherit_all: bool) -> Model {
    let mut plain = IndexDeclaration::new("ForwardToReplicas_replica")
        .settings(IndexSettings::new().attributes_to_highlight(["replica_highlight"]));
    if inherit_all {
        plain = plain.inherit();
    }
    ModelConfiguration::builder("ForwardToReplicas")
        .index_name("ForwardToReplicas")
        .synchronous(true)
        .attribute("name")
        .settings(
            IndexSettings::new()
                .searchable_attributes([searchable])
                .attributes_to_highlight(["primary_highlight"]),
        )
        .replica(plain)
        .replica(
            IndexDeclaration::new("ForwardToReplicas_replica_inherited")
                .inherit()
                .settings(IndexSettings::new().attributes_to_highlight(["replica_highlight"])),
        )
        .build()
        .expect("forward-to-replicas model")
}

/// Primary plus an additional index that owns a replica.
pub fn sub_replicas_model() -> Model {
    ModelConfiguration::builder("SubReplicas")
        .index_name("SubReplicas")
        .synchronous(true)
        .force_utf8(true)
        .settings(
            IndexSettings::new()
                .searchable_attributes(["name"])
                .custom_ranking(["asc(name)"]),
        )
        .additional_index(
            IndexDeclaration::new("Additional_Index")
                .per_environment(true)
                .settings(
                    IndexSettings::new()
                        .searchable_attributes(["name"])
                        .custom_ranking(["asc(name)"]),
                )
                .replica(
                    IndexDeclaration::new("Replica_Index")
                        .per_environment(true)
                        .settings(
                            IndexSettings::new()
                                .searchable_attributes(["name"])
                                .custom_ranking(["desc(name)"]),
                        ),
                ),
        )
        .build()
        .expect("sub-replicas model")
}

/// Primary with one virtual replica ranked the other way round.
pub fn virtual_replicas_model() -> Model {
    ModelConfiguration::builder("VirtualReplicas")
        .index_name("VirtualReplica_primary")
        .synchronous(true)
        .force_utf8(true)
        .settings(
            IndexSettings::new()
                .searchable_attributes(["name"])
                .custom_ranking(["asc(name)"]),
        )
        .replica(
            IndexDeclaration::new("VirtualReplica_replica")
                .virtual_replica()
                .settings(IndexSettings::new().custom_ranking(["desc(name)"])),
        )
        .build()
        .expect("virtual-replicas model")
}

/// Books: sanitized, tagged, with an author index and a conditional
/// public index.
pub fn book_model() -> Model {
    ModelConfiguration::builder("Book")
        .index_name("SecuredBook")
        .per_environment(true)
        .synchronous(true)
        .sanitize(true)
        .settings(IndexSettings::new().searchable_attributes(["name"]))
        .tags(&["premium", "released"], |b: &MemoryRecord| {
            let premium = truthy(b.field("premium").as_ref());
            let released = truthy(b.field("released").as_ref());
            vec![
                if premium { "premium" } else { "standard" }.to_string(),
                if released { "public" } else { "private" }.to_string(),
            ]
        })
        .additional_index(
            IndexDeclaration::new("BookAuthor")
                .per_environment(true)
                .settings(IndexSettings::new().searchable_attributes(["author"])),
        )
        .additional_index(
            IndexDeclaration::new("Book")
                .per_environment(true)
                .when(Predicate::method(|b: &MemoryRecord| {
                    truthy(b.field("released").as_ref()) && !truthy(b.field("premium").as_ref())
                }))
                .settings(IndexSettings::new().searchable_attributes(["name"])),
        )
        .build()
        .expect("book model")
}

/// Ebooks: a custom dirty predicate over two transient timestamps.
pub fn ebook_model() -> Model {
    ModelConfiguration::builder("Ebook")
        .index_name("eBooks")
        .synchronous(true)
        .settings(IndexSettings::new().searchable_attributes(["name"]))
        .dirty(DirtyStrategy::custom(|e: &MemoryRecord| {
            let published = e.field("published_at").and_then(|v| v.as_i64());
            let now = e.field("current_time").and_then(|v| v.as_i64());
            match (published, now) {
                (Some(published), Some(now)) => published < now,
                _ => true,
            }
        }))
        .build()
        .expect("ebook model")
}

/// Users identified by their name.
pub fn uniq_user_model() -> Model {
    ModelConfiguration::builder("UniqUser")
        .index_name("UniqUser")
        .per_environment(true)
        .synchronous(true)
        .id(IdStrategy::field("name"))
        .build()
        .expect("uniq-user model")
}

/// Records without an object id that are never indexable.
pub fn nullable_id_model() -> Model {
    ModelConfiguration::builder("NullableId")
        .index_name("NullableId")
        .per_environment(true)
        .synchronous(true)
        .id(IdStrategy::computed(|_: &MemoryRecord| None))
        .when(Predicate::method(|_: &MemoryRecord| false))
        .build()
        .expect("nullable-id model")
}

/// Items hidden from the index by a field.
pub fn nested_item_model() -> Model {
    ModelConfiguration::builder("NestedItem")
        .index_name("NestedItem")
        .per_environment(true)
        .synchronous(true)
        .unless(Predicate::field("hidden"))
        .attribute("nb_children")
        .build()
        .expect("nested-item model")
}

/// Computed attributes with static tags.
pub fn namespaced_model() -> Model {
    ModelConfiguration::builder("Namespaced::Model")
        .index_name("Namespaced_Model")
        .synchronous(true)
        .computed("customAttr", &["another_private_value"], |m: &MemoryRecord| {
            let value = m
                .field("another_private_value")
                .and_then(|v| v.as_i64())
                .unwrap_or_default();
            json!(40 + value)
        })
        .computed("myid", &[], |m: &MemoryRecord| {
            m.primary_key().unwrap_or(Value::Null)
        })
        .settings(IndexSettings::new().searchable_attributes(["customAttr"]))
        .static_tags(["static_tag1", "static_tag2"])
        .build()
        .expect("namespaced model")
}

/// A computed attribute producing raw non-ASCII bytes.
pub fn encoded_string_model(force_utf8: bool) -> Model {
    ModelConfiguration::builder("EncodedString")
        .index_name("EncodedString")
        .synchronous(true)
        .force_utf8(force_utf8)
        .computed("value", &[], |_: &MemoryRecord| {
            vec![0xC2u8, 0xA0, 0xE2, 0x80, 0xA2, 0xC2, 0xA0]
        })
        .build()
        .expect("encoded-string model")
}

/// Products: manual indexing only, published and linked products.
pub fn product_model() -> Model {
    ModelConfiguration::builder("Product")
        .index_name("my_products_index")
        .auto_index(false)
        .attributes(["href", "name"])
        .when(Predicate::method(|p: &MemoryRecord| {
            let now = p.field("now").and_then(|v| v.as_i64()).unwrap_or_default();
            match p.field("release_date").and_then(|v| v.as_i64()) {
                Some(released) => released <= now,
                None => true,
            }
        }))
        .unless(Predicate::method(|p: &MemoryRecord| {
            blank(p.field("href").as_ref())
        }))
        .tags(&["name"], |p: &MemoryRecord| {
            let name = p
                .field("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            vec![name.clone(), name]
        })
        .build()
        .expect("product model")
}

/// Hands every write to `dispatcher`.
pub fn enqueued_model(dispatcher: Arc<dyn JobDispatcher>) -> Model {
    ModelConfiguration::builder("EnqueuedObject")
        .index_name("EnqueuedObject")
        .attribute("name")
        .enqueue(EnqueuePolicy::Enqueue(dispatcher))
        .build()
        .expect("enqueued model")
}

/// Indexing disabled through `toggle`.
pub fn disabled_model(toggle: impl Into<Toggle>) -> Model {
    ModelConfiguration::builder("DisabledIndexing")
        .index_name("DisabledIndexing")
        .synchronous(true)
        .check_settings(true)
        .attribute("name")
        .disable_indexing(toggle)
        .build()
        .expect("disabled model")
}

/// A plain model that never checks settings.
pub fn phone_model() -> Model {
    ModelConfiguration::builder("Phone")
        .index_name("Phone")
        .check_settings(false)
        .build()
        .expect("phone model")
}

// ============================================================================
// Record Fixtures
// ============================================================================

/// An unsaved color.
pub fn color(name: &str, short_name: &str, hex: i64) -> MemoryRecord {
    MemoryRecord::new("Color")
        .with_field("name", json!(name))
        .with_field("short_name", json!(short_name))
        .with_field("hex", json!(hex))
}

/// An unsaved city with ranking fields `a` and `b`.
pub fn city(name: &str, country: &str, a: i64, b: i64) -> MemoryRecord {
    MemoryRecord::new("City")
        .with_field("name", json!(name))
        .with_field("country", json!(country))
        .with_field("a", json!(a))
        .with_field("b", json!(b))
}

/// An unsaved book.
pub fn book(name: &str, author: &str, premium: bool, released: bool) -> MemoryRecord {
    MemoryRecord::new("Book")
        .with_field("name", json!(name))
        .with_field("author", json!(author))
        .with_field("premium", json!(premium))
        .with_field("released", json!(released))
}

/// An unsaved record of `model` with only a name.
pub fn named(model: &str, name: &str) -> MemoryRecord {
    MemoryRecord::new(model).with_field("name", json!(name))
}

/// An unsaved product.
pub fn product(name: &str, href: &str) -> MemoryRecord {
    MemoryRecord::new("Product")
        .with_field("name", json!(name))
        .with_field("href", json!(href))
}

/// Builds and saves one named record per name, with ids starting at 1.
pub fn saved_named(model: &str, names: &[&str]) -> Vec<MemoryRecord> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut record = named(model, name);
            record.save(i as i64 + 1);
            record
        })
        .collect()
}
