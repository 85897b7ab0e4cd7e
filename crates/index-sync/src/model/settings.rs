//! Index settings and settings diffing.
//!
//! [`IndexSettings`] is the declared, in-memory desired configuration of one
//! index target. It is never mutated after a model is built; the replica
//! list is computed by the replica graph and added only to the JSON map that
//! is pushed to the remote index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings key holding the replica list of a primary index.
pub const REPLICAS_KEY: &str = "replicas";

/// Desired settings of one index target.
///
/// The five list fields are the ones the engine diffs against the remote
/// copy. Anything else goes into `extra` and is pushed verbatim.
///
/// # Example
///
/// ```
/// use index_sync::model::IndexSettings;
///
/// let settings = IndexSettings::new()
///     .searchable_attributes(["name"])
///     .custom_ranking(["asc(hex)"]);
///
/// let map = settings.to_map();
/// assert_eq!(map["searchableAttributes"], serde_json::json!(["name"]));
/// assert!(!map.contains_key("attributesForFaceting"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSettings {
    /// Attributes searched by full-text queries, in priority order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable_attributes: Option<Vec<String>>,

    /// Tie-breaking ranking criteria such as `asc(hex)` or `desc(b)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ranking: Option<Vec<String>>,

    /// Attributes usable as facets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_for_faceting: Option<Vec<String>>,

    /// Attributes highlighted in results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_to_highlight: Option<Vec<String>>,

    /// Attributes snippeted in results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_to_snippet: Option<Vec<String>>,

    /// Any other setting, pushed as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn strings<I, S>(values: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Some(values.into_iter().map(Into::into).collect())
}

impl IndexSettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `searchableAttributes`.
    pub fn searchable_attributes<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable_attributes = strings(values);
        self
    }

    /// Sets `customRanking`.
    pub fn custom_ranking<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_ranking = strings(values);
        self
    }

    /// Sets `attributesForFaceting`.
    pub fn attributes_for_faceting<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes_for_faceting = strings(values);
        self
    }

    /// Sets `attributesToHighlight`.
    pub fn attributes_to_highlight<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes_to_highlight = strings(values);
        self
    }

    /// Sets `attributesToSnippet`.
    pub fn attributes_to_snippet<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes_to_snippet = strings(values);
        self
    }

    /// Sets an arbitrary setting.
    ///
    /// The replica list is owned by the replica graph, so a declared
    /// `replicas` key is ignored.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key != REPLICAS_KEY {
            self.extra.insert(key, value);
        }
        self
    }

    /// Returns true when nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.searchable_attributes.is_none()
            && self.custom_ranking.is_none()
            && self.attributes_for_faceting.is_none()
            && self.attributes_to_highlight.is_none()
            && self.attributes_to_snippet.is_none()
            && self.extra.is_empty()
    }

    /// Returns these settings layered over `base`: every field declared here
    /// wins, everything else comes from `base`.
    pub fn merged_over(&self, base: &IndexSettings) -> IndexSettings {
        let mut extra = base.extra.clone();
        for (key, value) in &self.extra {
            extra.insert(key.clone(), value.clone());
        }
        IndexSettings {
            searchable_attributes: self
                .searchable_attributes
                .clone()
                .or_else(|| base.searchable_attributes.clone()),
            custom_ranking: self
                .custom_ranking
                .clone()
                .or_else(|| base.custom_ranking.clone()),
            attributes_for_faceting: self
                .attributes_for_faceting
                .clone()
                .or_else(|| base.attributes_for_faceting.clone()),
            attributes_to_highlight: self
                .attributes_to_highlight
                .clone()
                .or_else(|| base.attributes_to_highlight.clone()),
            attributes_to_snippet: self
                .attributes_to_snippet
                .clone()
                .or_else(|| base.attributes_to_snippet.clone()),
            extra,
        }
    }

    /// Converts to the JSON map pushed to the remote index.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let lists = [
            ("searchableAttributes", &self.searchable_attributes),
            ("customRanking", &self.custom_ranking),
            ("attributesForFaceting", &self.attributes_for_faceting),
            ("attributesToHighlight", &self.attributes_to_highlight),
            ("attributesToSnippet", &self.attributes_to_snippet),
        ];
        for (key, values) in lists {
            if let Some(values) = values {
                map.insert(
                    key.to_string(),
                    Value::Array(values.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        for (key, value) in &self.extra {
            if key != REPLICAS_KEY {
                map.insert(key.clone(), value.clone());
            }
        }
        map
    }
}

/// Returns whether `desired` differs from the `remote` settings.
///
/// `remote` is `None` when the index does not exist, which always counts as
/// changed. Only keys present in `desired` are compared; remote keys the
/// model never declares are left alone. An absent or `null` value equals an
/// empty list.
///
/// ```
/// use index_sync::model::settings_changed;
/// use serde_json::{json, Map, Value};
///
/// fn map(v: Value) -> Map<String, Value> {
///     v.as_object().cloned().unwrap_or_default()
/// }
///
/// assert!(settings_changed(None, &Map::new()));
/// assert!(!settings_changed(Some(&Map::new()), &Map::new()));
/// assert!(!settings_changed(
///     Some(&map(json!({"customRanking": null}))),
///     &map(json!({"customRanking": []})),
/// ));
/// ```
pub fn settings_changed(remote: Option<&Map<String, Value>>, desired: &Map<String, Value>) -> bool {
    let Some(remote) = remote else {
        return true;
    };
    desired
        .iter()
        .any(|(key, value)| !same_setting(remote.get(key), Some(value)))
}

fn same_setting(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (normalize(left), normalize(right)) {
        (None, None) => true,
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn normalize(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        other => other,
    }
}
