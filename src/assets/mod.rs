pub mod data_uri;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Scheme prefix of an inline payload.
pub const DATA_URI_PREFIX: &str = "data:";

/// Sentinel left behind where a value was elided to save space.
/// A string carrying it is not real data and is never uploaded.
pub const TRUNCATION_MARKER: &str = "[truncated]";

/// A document attached to a project (site-visit plan, report scan, ...) with its annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    /// Outer `None` when the key is absent, `Some(None)` for an explicit `null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub photos: Option<Option<Vec<String>>>,
    pub position: Position,
    #[serde(default)]
    pub resolved: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Annotation {
    pub fn image(&self) -> Option<&str> {
        self.image_url.as_ref()?.as_deref()
    }

    pub fn photo_list(&self) -> &[String] {
        self.photos
            .as_ref()
            .and_then(Option::as_ref)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

// A key that is present, even as `null`, stays present on the way back out.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Percentage coordinates on the document page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Location of an asset-bearing field inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetPath {
    DocumentUrl,
    AnnotationImage { annotation: usize },
    AnnotationPhoto { annotation: usize, photo: usize },
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetPath::DocumentUrl => write!(f, "url"),
            AssetPath::AnnotationImage { annotation } => {
                write!(f, "annotations[{}].imageUrl", annotation)
            }
            AssetPath::AnnotationPhoto { annotation, photo } => {
                write!(f, "annotations[{}].photos[{}]", annotation, photo)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAsset {
    pub path: AssetPath,
    pub value: String,
}

pub fn is_inline_asset(value: &str) -> bool {
    value.starts_with(DATA_URI_PREFIX) && !value.contains(TRUNCATION_MARKER)
}

pub fn is_remote_reference(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

/// Every field of `document` that still holds an inline payload, in document order.
pub fn find_inline_assets(document: &Document) -> Vec<InlineAsset> {
    let mut found = Vec::new();

    if is_inline_asset(&document.url) {
        found.push(InlineAsset {
            path: AssetPath::DocumentUrl,
            value: document.url.clone(),
        });
    }

    for (i, annotation) in document.annotations.iter().enumerate() {
        if let Some(image) = annotation.image() {
            if is_inline_asset(image) {
                found.push(InlineAsset {
                    path: AssetPath::AnnotationImage { annotation: i },
                    value: image.to_string(),
                });
            }
        }
        for (j, photo) in annotation.photo_list().iter().enumerate() {
            if is_inline_asset(photo) {
                found.push(InlineAsset {
                    path: AssetPath::AnnotationPhoto {
                        annotation: i,
                        photo: j,
                    },
                    value: photo.clone(),
                });
            }
        }
    }

    found
}

/// Apply resolved replacements. Paths that no longer exist are skipped.
/// `changed` is true iff at least one field now holds a different value.
pub fn rewrite(document: &Document, resolved: &HashMap<AssetPath, String>) -> (Document, bool) {
    let mut updated = document.clone();
    let mut changed = false;

    for (path, replacement) in resolved {
        let Some(slot) = field_mut(&mut updated, *path) else {
            continue;
        };
        if slot != replacement {
            *slot = replacement.clone();
            changed = true;
        }
    }

    (updated, changed)
}

fn field_mut(document: &mut Document, path: AssetPath) -> Option<&mut String> {
    match path {
        AssetPath::DocumentUrl => Some(&mut document.url),
        AssetPath::AnnotationImage { annotation } => document
            .annotations
            .get_mut(annotation)?
            .image_url
            .as_mut()?
            .as_mut(),
        AssetPath::AnnotationPhoto { annotation, photo } => document
            .annotations
            .get_mut(annotation)?
            .photos
            .as_mut()?
            .as_mut()?
            .get_mut(photo),
    }
}
