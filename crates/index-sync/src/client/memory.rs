//! In-process search service.
//!
//! Behaves like the hosted API for everything the engine relies on: settings
//! merge per key, a `replicas` setting creates and links replica indices,
//! replicas serve their primary's objects under their own ranking, and
//! `move_index` keeps the destination's replica list. Every call is logged as
//! a [`RemoteCall`] so tests can assert on exactly what went over the wire.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::trace;

use super::{FacetHit, SearchClient, SearchQuery, SearchResponse, TaskId};
use crate::error::{RemoteError, RemoteResult};
use crate::model::{Document, OBJECT_ID_FIELD, ObjectId, REPLICAS_KEY};

/// One call received by [`InMemorySearchClient`].
// Variants mirror the SearchClient methods of the same name
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    GetSettings { index: String },
    SetSettings { index: String, settings: Map<String, Value> },
    SaveObjects { index: String, object_ids: Vec<String> },
    DeleteObjects { index: String, object_ids: Vec<String> },
    DeleteObject { index: String, object_id: String },
    Search { index: String, query: String },
    SearchForFacetValues { index: String, facet: String, facet_query: String },
    GetObject { index: String, object_id: String },
    WaitForTask { index: String, task: TaskId },
    ClearObjects { index: String },
    DeleteIndex { index: String },
    MoveIndex { source: String, destination: String },
}

impl RemoteCall {
    /// The index the call addressed (the source index for moves).
    pub fn index(&self) -> &str {
        match self {
            RemoteCall::GetSettings { index }
            | RemoteCall::SetSettings { index, .. }
            | RemoteCall::SaveObjects { index, .. }
            | RemoteCall::DeleteObjects { index, .. }
            | RemoteCall::DeleteObject { index, .. }
            | RemoteCall::Search { index, .. }
            | RemoteCall::SearchForFacetValues { index, .. }
            | RemoteCall::GetObject { index, .. }
            | RemoteCall::WaitForTask { index, .. }
            | RemoteCall::ClearObjects { index }
            | RemoteCall::DeleteIndex { index } => index,
            RemoteCall::MoveIndex { source, .. } => source,
        }
    }

    /// Whether the call changes remote state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            RemoteCall::GetSettings { .. }
                | RemoteCall::Search { .. }
                | RemoteCall::SearchForFacetValues { .. }
                | RemoteCall::GetObject { .. }
                | RemoteCall::WaitForTask { .. }
        )
    }

    /// Whether the call saves or deletes objects.
    pub fn is_object_write(&self) -> bool {
        matches!(
            self,
            RemoteCall::SaveObjects { .. }
                | RemoteCall::DeleteObjects { .. }
                | RemoteCall::DeleteObject { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    seq: u64,
    document: Document,
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    settings: Map<String, Value>,
    objects: BTreeMap<String, StoredObject>,
    primary: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, IndexState>,
    calls: Vec<RemoteCall>,
    next_task: u64,
    next_seq: u64,
}

impl State {
    fn task(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId(self.next_task)
    }

    /// The index whose objects `index` serves.
    fn source_of<'a>(&'a self, index: &'a IndexState) -> &'a IndexState {
        index
            .primary
            .as_ref()
            .and_then(|p| self.indices.get(p))
            .unwrap_or(index)
    }
}

#[derive(Debug, Clone, Default)]
struct Faults {
    fail_moves: Option<String>,
    max_object_bytes: Option<usize>,
    task_delay: Option<Duration>,
}

/// A search service living in process memory.
#[derive(Debug, Default)]
pub struct InMemorySearchClient {
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

impl InMemorySearchClient {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects objects whose JSON encoding exceeds `bytes`.
    pub fn with_max_object_bytes(self, bytes: usize) -> Self {
        self.faults.lock().max_object_bytes = Some(bytes);
        self
    }

    /// Delays every task completion by `delay`.
    pub fn with_task_delay(self, delay: Duration) -> Self {
        self.faults.lock().task_delay = Some(delay);
        self
    }

    /// Makes every subsequent `move_index` fail with `message`.
    pub fn fail_moves(&self, message: impl Into<String>) {
        self.faults.lock().fail_moves = Some(message.into());
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the calls that addressed `index`.
    pub fn calls_to(&self, index: &str) -> Vec<RemoteCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.index() == index)
            .cloned()
            .collect()
    }

    /// Forgets the call log.
    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Names of the existing indices.
    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().indices.keys().cloned().collect()
    }

    /// Whether an index exists.
    pub fn has_index(&self, index: &str) -> bool {
        self.state.lock().indices.contains_key(index)
    }

    /// Objects stored in an index, in insertion order.
    pub fn objects(&self, index: &str) -> Vec<Document> {
        let state = self.state.lock();
        let Some(idx) = state.indices.get(index) else {
            return Vec::new();
        };
        let mut objects: Vec<&StoredObject> = idx.objects.values().collect();
        objects.sort_by_key(|o| o.seq);
        objects.into_iter().map(|o| o.document.clone()).collect()
    }

    /// One stored object.
    pub fn object(&self, index: &str, object_id: &str) -> Option<Document> {
        let state = self.state.lock();
        state
            .indices
            .get(index)
            .and_then(|idx| idx.objects.get(object_id))
            .map(|o| o.document.clone())
    }

    /// Current settings of an index.
    pub fn settings(&self, index: &str) -> Option<Map<String, Value>> {
        self.state.lock().indices.get(index).map(|i| i.settings.clone())
    }

    /// Writes settings without logging a call.
    pub fn seed_settings(&self, index: &str, settings: Map<String, Value>) {
        let mut state = self.state.lock();
        apply_settings(&mut state, index, settings);
    }

    /// Stores objects without logging a call.
    pub fn seed_objects(&self, index: &str, objects: Vec<Document>) {
        let mut state = self.state.lock();
        for object in objects {
            if let Some(id) = object_id_of(&object) {
                store(&mut state, index, id, object);
            }
        }
    }
}

fn object_id_of(document: &Document) -> Option<String> {
    match document.get(OBJECT_ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn store(state: &mut State, index: &str, id: String, document: Document) {
    state.next_seq += 1;
    let seq = state.next_seq;
    let idx = state.indices.entry(index.to_string()).or_default();
    let seq = idx.objects.get(&id).map(|o| o.seq).unwrap_or(seq);
    idx.objects.insert(id, StoredObject { seq, document });
}

fn replica_name(entry: &str) -> &str {
    entry
        .strip_prefix("virtual(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(entry)
}

fn apply_settings(state: &mut State, index: &str, settings: Map<String, Value>) {
    let replicas: Option<Vec<String>> = settings.get(REPLICAS_KEY).map(|v| {
        v.as_array()
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(|s| replica_name(s).to_string())
                    .collect()
            })
            .unwrap_or_default()
    });

    let idx = state.indices.entry(index.to_string()).or_default();
    for (key, value) in settings {
        if value.is_null() {
            idx.settings.remove(&key);
        } else {
            idx.settings.insert(key, value);
        }
    }

    if let Some(replicas) = replicas {
        for (name, other) in state.indices.iter_mut() {
            if other.primary.as_deref() == Some(index) && !replicas.contains(name) {
                other.primary = None;
            }
        }
        for name in replicas {
            state.indices.entry(name).or_default().primary = Some(index.to_string());
        }
    }
}

fn not_found(index: &str) -> RemoteError {
    RemoteError::IndexNotFound {
        index: index.to_string(),
    }
}

fn string_list(settings: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    settings.get(key)?.as_array().map(|a| {
        a.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

/// Top-level attribute names from `searchableAttributes` entries such as
/// `"name"`, `"title,alternative_title"` or `"unordered(author)"`.
fn searchable_fields(settings: &Map<String, Value>) -> Option<Vec<String>> {
    let entries = string_list(settings, "searchableAttributes")?;
    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .flat_map(|entry| {
                let inner = entry
                    .strip_prefix("unordered(")
                    .or_else(|| entry.strip_prefix("ordered("))
                    .and_then(|s| s.strip_suffix(')'))
                    .unwrap_or(entry);
                inner.split(',').map(|s| s.trim().to_string())
            })
            .collect(),
    )
}

fn collect_words(value: &Value, words: &mut Vec<String>) {
    match value {
        Value::String(s) => words.extend(
            s.split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase),
        ),
        Value::Number(n) => words.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_words(v, words)),
        Value::Object(map) => map.values().for_each(|v| collect_words(v, words)),
        Value::Bool(_) | Value::Null => {}
    }
}

fn matches_query(document: &Document, tokens: &[String], fields: Option<&[String]>) -> bool {
    if tokens.is_empty() {
        return true;
    }
    let mut words = Vec::new();
    match fields {
        Some(fields) => {
            for field in fields {
                if let Some(value) = document.get(field) {
                    collect_words(value, &mut words);
                }
            }
        }
        None => {
            for (key, value) in document {
                if key != OBJECT_ID_FIELD {
                    collect_words(value, &mut words);
                }
            }
        }
    }
    tokens
        .iter()
        .all(|token| words.iter().any(|w| w.starts_with(token.as_str())))
}

/// Whether `attributesForFaceting` declares `facet` as searchable.
fn is_searchable_facet(settings: &Map<String, Value>, facet: &str) -> bool {
    string_list(settings, "attributesForFaceting")
        .unwrap_or_default()
        .iter()
        .any(|entry| {
            entry
                .strip_prefix("searchable(")
                .and_then(|s| s.strip_suffix(')'))
                == Some(facet)
        })
}

fn facet_values(document: &Document, facet: &str) -> Vec<String> {
    match document.get(facet) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(Value::Bool(b)) => vec![b.to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Wraps the first word prefix of `value` matching `prefix` (case
/// insensitive) in `<em>` tags, or returns `None` when no word matches.
fn highlight_prefix(value: &str, prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return Some(value.to_string());
    }
    let wanted: Vec<char> = prefix.chars().flat_map(char::to_lowercase).collect();
    let mut previous: Option<char> = None;
    for (start, c) in value.char_indices() {
        let word_start = previous.is_none_or(|p| !p.is_alphanumeric());
        previous = Some(c);
        if !word_start || !c.is_alphanumeric() {
            continue;
        }
        let mut end = start;
        let mut matched = 0;
        for candidate in value[start..].chars() {
            if matched == wanted.len() {
                break;
            }
            let lowered: Vec<char> = candidate.to_lowercase().collect();
            if wanted.get(matched..matched + lowered.len()) != Some(lowered.as_slice()) {
                break;
            }
            matched += lowered.len();
            end += candidate.len_utf8();
        }
        if matched == wanted.len() {
            return Some(format!(
                "{}<em>{}</em>{}",
                &value[..start],
                &value[start..end],
                &value[end..]
            ));
        }
    }
    None
}

fn has_tags(document: &Document, tags: &[String]) -> bool {
    let present: Vec<&str> = document
        .get("_tags")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    tags.iter().all(|t| present.contains(&t.as_str()))
}

/// Parses `asc(field)` / `desc(field)` entries.
fn ranking(settings: &Map<String, Value>) -> Vec<(String, bool)> {
    string_list(settings, "customRanking")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            if let Some(field) = entry.strip_prefix("asc(").and_then(|s| s.strip_suffix(')')) {
                Some((field.to_string(), true))
            } else {
                entry
                    .strip_prefix("desc(")
                    .and_then(|s| s.strip_suffix(')'))
                    .map(|field| (field.to_string(), false))
            }
        })
        .collect()
}

fn compare_values(left: Option<&Value>, right: Option<&Value>, ascending: bool) -> Ordering {
    let ordering = match (left, right) {
        (None, None) => return Ordering::Equal,
        // missing values rank last in both directions
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    };
    if ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

#[async_trait]
impl SearchClient for InMemorySearchClient {
    async fn get_settings(&self, index: &str) -> RemoteResult<Map<String, Value>> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::GetSettings {
            index: index.to_string(),
        });
        state
            .indices
            .get(index)
            .map(|i| i.settings.clone())
            .ok_or_else(|| not_found(index))
    }

    async fn set_settings(
        &self,
        index: &str,
        settings: Map<String, Value>,
    ) -> RemoteResult<TaskId> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::SetSettings {
            index: index.to_string(),
            settings: settings.clone(),
        });
        apply_settings(&mut state, index, settings);
        Ok(state.task())
    }

    async fn save_objects(&self, index: &str, objects: Vec<Document>) -> RemoteResult<TaskId> {
        let limit = self.faults.lock().max_object_bytes;
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(objects.len());
        for (position, object) in objects.iter().enumerate() {
            let id = object_id_of(object).ok_or_else(|| RemoteError::Http {
                index: index.to_string(),
                status: 400,
                message: format!("Record at the position {position} is missing objectID"),
            })?;
            if let Some(limit) = limit {
                let size = serde_json::to_vec(object)
                    .map(|b| b.len())
                    .unwrap_or(usize::MAX);
                if size > limit {
                    state.calls.push(RemoteCall::SaveObjects {
                        index: index.to_string(),
                        object_ids: vec![id.clone()],
                    });
                    return Err(RemoteError::Http {
                        index: index.to_string(),
                        status: 400,
                        message: format!(
                            "Record at the position {position} objectID={id} \
                             is too big size={size} bytes"
                        ),
                    });
                }
            }
            ids.push(id);
        }
        state.calls.push(RemoteCall::SaveObjects {
            index: index.to_string(),
            object_ids: ids.clone(),
        });
        for (id, object) in ids.into_iter().zip(objects) {
            store(&mut state, index, id, object);
        }
        Ok(state.task())
    }

    async fn delete_objects(&self, index: &str, ids: Vec<ObjectId>) -> RemoteResult<TaskId> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::DeleteObjects {
            index: index.to_string(),
            object_ids: ids.iter().map(|id| id.to_string()).collect(),
        });
        if let Some(idx) = state.indices.get_mut(index) {
            for id in &ids {
                idx.objects.remove(id.as_str());
            }
        }
        Ok(state.task())
    }

    async fn delete_object(&self, index: &str, id: &ObjectId) -> RemoteResult<TaskId> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::DeleteObject {
            index: index.to_string(),
            object_id: id.to_string(),
        });
        let idx = state.indices.get_mut(index).ok_or_else(|| not_found(index))?;
        if idx.objects.remove(id.as_str()).is_none() {
            return Err(RemoteError::ObjectNotFound {
                index: index.to_string(),
                object_id: id.to_string(),
            });
        }
        Ok(state.task())
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> RemoteResult<SearchResponse> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Search {
            index: index.to_string(),
            query: query.query.clone(),
        });
        let idx = state.indices.get(index).ok_or_else(|| not_found(index))?;
        let source = state.source_of(idx);

        let tokens: Vec<String> = query
            .query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let fields = searchable_fields(&idx.settings);
        let ranking = ranking(&idx.settings);

        let mut hits: Vec<&StoredObject> = source
            .objects
            .values()
            .filter(|o| {
                matches_query(&o.document, &tokens, fields.as_deref())
                    && has_tags(&o.document, &query.tag_filters)
            })
            .collect();
        hits.sort_by(|a, b| {
            ranking
                .iter()
                .map(|(field, ascending)| {
                    compare_values(a.document.get(field), b.document.get(field), *ascending)
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });

        let nb_hits = hits.len();
        let limit = query.hits_per_page.unwrap_or(nb_hits);
        trace!(index, nb_hits, "in-memory search");
        Ok(SearchResponse {
            hits: hits
                .into_iter()
                .take(limit)
                .map(|o| o.document.clone())
                .collect(),
            nb_hits,
        })
    }

    async fn search_for_facet_values(
        &self,
        index: &str,
        facet: &str,
        facet_query: &str,
        query: &SearchQuery,
    ) -> RemoteResult<Vec<FacetHit>> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::SearchForFacetValues {
            index: index.to_string(),
            facet: facet.to_string(),
            facet_query: facet_query.to_string(),
        });
        let idx = state.indices.get(index).ok_or_else(|| not_found(index))?;
        if !is_searchable_facet(&idx.settings, facet) {
            return Err(RemoteError::Http {
                index: index.to_string(),
                status: 400,
                message: format!(
                    "Cannot search in `{facet}` attribute, you need to add \
                     `searchable({facet})` to attributesForFaceting."
                ),
            });
        }
        let source = state.source_of(idx);

        let tokens: Vec<String> = query
            .query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let fields = searchable_fields(&idx.settings);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for object in source.objects.values() {
            if !matches_query(&object.document, &tokens, fields.as_deref())
                || !has_tags(&object.document, &query.tag_filters)
            {
                continue;
            }
            for value in facet_values(&object.document, facet) {
                *counts.entry(value).or_default() += 1;
            }
        }

        let mut hits: Vec<FacetHit> = counts
            .into_iter()
            .filter_map(|(value, count)| {
                highlight_prefix(&value, facet_query).map(|highlighted| FacetHit {
                    value,
                    highlighted,
                    count,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        if let Some(limit) = query.hits_per_page {
            hits.truncate(limit);
        }
        trace!(index, facet, values = hits.len(), "in-memory facet search");
        Ok(hits)
    }

    async fn get_object(&self, index: &str, id: &ObjectId) -> RemoteResult<Document> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::GetObject {
            index: index.to_string(),
            object_id: id.to_string(),
        });
        let idx = state.indices.get(index).ok_or_else(|| not_found(index))?;
        state
            .source_of(idx)
            .objects
            .get(id.as_str())
            .map(|o| o.document.clone())
            .ok_or_else(|| RemoteError::ObjectNotFound {
                index: index.to_string(),
                object_id: id.to_string(),
            })
    }

    async fn wait_for_task(&self, index: &str, task: TaskId) -> RemoteResult<()> {
        {
            let mut state = self.state.lock();
            state.calls.push(RemoteCall::WaitForTask {
                index: index.to_string(),
                task,
            });
        }
        let delay = self.faults.lock().task_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn clear_objects(&self, index: &str) -> RemoteResult<TaskId> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::ClearObjects {
            index: index.to_string(),
        });
        if let Some(idx) = state.indices.get_mut(index) {
            idx.objects.clear();
        }
        Ok(state.task())
    }

    async fn delete_index(&self, index: &str) -> RemoteResult<TaskId> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::DeleteIndex {
            index: index.to_string(),
        });
        state.indices.remove(index);
        for other in state.indices.values_mut() {
            if other.primary.as_deref() == Some(index) {
                other.primary = None;
            }
        }
        Ok(state.task())
    }

    async fn move_index(&self, source: &str, destination: &str) -> RemoteResult<TaskId> {
        let failure = self.faults.lock().fail_moves.clone();
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::MoveIndex {
            source: source.to_string(),
            destination: destination.to_string(),
        });
        if let Some(message) = failure {
            return Err(RemoteError::Http {
                index: source.to_string(),
                status: 500,
                message,
            });
        }
        let mut moved = state
            .indices
            .remove(source)
            .ok_or_else(|| not_found(source))?;
        if let Some(previous) = state.indices.get(destination) {
            if let Some(replicas) = previous.settings.get(REPLICAS_KEY) {
                moved
                    .settings
                    .insert(REPLICAS_KEY.to_string(), replicas.clone());
            }
            moved.primary = previous.primary.clone();
        }
        state.indices.insert(destination.to_string(), moved);
        Ok(state.task())
    }
}
