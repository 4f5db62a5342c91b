use serde_json::Value;

use crate::assets::data_uri::DataUri;
use crate::assets::{is_inline_asset, TRUNCATION_MARKER};

/// What `trim` is allowed to strip from an oversized bulk collection.
#[derive(Debug, Clone)]
pub struct TrimPolicy {
    /// Free-text fields longer than this many characters are cut.
    pub description_limit: usize,
    /// Object keys treated as free text.
    pub text_fields: Vec<String>,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            description_limit: 100,
            text_fields: vec!["description".to_string(), "notes".to_string()],
        }
    }
}

/// How far [`TrimPolicy::trim`] may go when a value does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimScope {
    /// Nothing is stripped.
    Exact,
    /// Free text is cut; inline payloads are kept.
    TextOnly,
    /// Free text is cut and inline payloads become a truncated sentinel.
    Full,
}

impl TrimPolicy {
    /// Return a smaller copy of `value` within `scope`: long descriptions are cut
    /// to the limit and, under [`TrimScope::Full`], inline payloads are elided.
    /// Everything else is kept as-is.
    pub fn trim(&self, value: &Value, scope: TrimScope) -> Value {
        match scope {
            TrimScope::Exact => value.clone(),
            TrimScope::TextOnly => self.shrink(value, false),
            TrimScope::Full => self.shrink(value, true),
        }
    }

    fn shrink(&self, value: &Value, elide_payloads: bool) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let trimmed = match v {
                            Value::String(s) if self.text_fields.iter().any(|f| f == k) => {
                                Value::String(self.cut_text(s, elide_payloads))
                            }
                            other => self.shrink(other, elide_payloads),
                        };
                        (k.clone(), trimmed)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.shrink(v, elide_payloads))
                    .collect(),
            ),
            Value::String(s) if elide_payloads && is_inline_asset(s) => {
                Value::String(elide_payload(s))
            }
            other => other.clone(),
        }
    }

    fn cut_text(&self, text: &str, elide_payloads: bool) -> String {
        if is_inline_asset(text) {
            return if elide_payloads {
                elide_payload(text)
            } else {
                text.to_string()
            };
        }
        if text.chars().count() <= self.description_limit {
            return text.to_string();
        }
        let kept: String = text.chars().take(self.description_limit).collect();
        format!("{}...{}", kept, TRUNCATION_MARKER)
    }
}

fn elide_payload(uri: &str) -> String {
    let header = DataUri::header_of(uri).unwrap_or("data:,");
    format!("{}{}", header, TRUNCATION_MARKER)
}
