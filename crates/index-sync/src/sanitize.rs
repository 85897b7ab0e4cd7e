//! HTML sanitizing for outbound documents.

use regex::Regex;
use serde_json::Value;

use crate::error::ConfigurationError;

/// Strips markup from text attributes before they are sent to the index.
///
/// `<script>` and `<style>` elements are removed together with their
/// content, every other tag is dropped, and stray `&`, `<` and `>` left in
/// the text are escaped.
#[derive(Debug, Clone)]
pub struct HtmlSanitizer {
    blocks: Regex,
    tags: Regex,
}

impl HtmlSanitizer {
    /// Compiles the sanitizer patterns.
    pub fn new() -> Result<Self, ConfigurationError> {
        let blocks = Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>")?;
        let tags = Regex::new(r"(?s)<[a-zA-Z!/?][^<>]*>")?;
        Ok(Self { blocks, tags })
    }

    /// Sanitizes one string.
    pub fn clean(&self, text: &str) -> String {
        let without_blocks = self.blocks.replace_all(text, "");
        let without_tags = self.tags.replace_all(&without_blocks, "");
        escape(&without_tags)
    }

    /// Sanitizes every string inside a JSON value, recursively.
    ///
    /// Object keys are left unchanged.
    pub fn clean_value(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.clean(&text)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.clean_value(v)).collect())
            }
            Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, self.clean_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
