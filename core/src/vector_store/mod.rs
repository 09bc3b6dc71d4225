//! Persisted embedding storage and retrieval.
//!
//! The store is a flat keyed container in a single file. Each record holds a
//! content-addressed [`EmbeddingKey`], an `f32` vector and the article's
//! metadata. The article body is never written.

pub mod format;
mod reader;
mod writer;

pub use reader::{EmbeddingStore, Records};
pub use writer::{SaveReport, StoreWriter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::article::TITLE_FIELD;
use crate::identity::EmbeddingKey;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Store I/O error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{}` is not an embedding store", .0.display())]
    NotAStore(PathBuf),
    #[error("Failed to encode record: {0}")]
    Encode(#[source] bincode::Error),
    #[error("Corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
    #[error("Record of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("Got {articles} articles but {vectors} vectors")]
    LengthMismatch { articles: usize, vectors: usize },
    #[error("Vector for key {key} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        found: usize,
    },
    #[error("Duplicate key {0}")]
    DuplicateKey(EmbeddingKey),
    #[error("Failed to encode attribute `{name}`: {source}")]
    Attribute {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A metadata value as persisted next to a vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Arrays, objects, null and integers beyond `i64`, as compact JSON text
    Json(String),
}

impl AttributeValue {
    /// # Errors
    /// Only if `value` can't be rendered as JSON text.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        Ok(match value {
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.is_f64()) {
                (Some(i), _) => Self::Integer(i),
                (None, true) => n.as_f64().map_or_else(|| Self::Json(n.to_string()), Self::Float),
                (None, false) => Self::Json(n.to_string()),
            },
            other => Self::Json(serde_json::to_string(other)?),
        })
    }

    /// The value as it appeared in the source record.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
            Self::Json(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Json(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// The persisted unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: EmbeddingKey,
    pub vector: Vec<f32>,
    pub attributes: Attributes,
}

impl StoredRecord {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn title(&self) -> String {
        self.attribute(TITLE_FIELD)
            .map(AttributeValue::as_text)
            .unwrap_or_default()
    }
}

/// What a writer does when a key is written twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// The later record replaces the earlier one.
    #[default]
    Overwrite,
    /// Fail the save with [`VectorStoreError::DuplicateKey`] before writing anything.
    Reject,
}

impl std::str::FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(Self::Overwrite),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown collision policy `{other}`")),
        }
    }
}

/// Everything a downstream consumer reads from a store, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedEmbeddings {
    pub keys: Vec<EmbeddingKey>,
    pub vectors: Vec<Vec<f32>>,
    /// Only the attributes that were asked for; absent ones are simply missing.
    pub attributes: Vec<Attributes>,
}

impl LoadedEmbeddings {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    /// The `name` attribute of the i-th record as text, empty when absent.
    pub fn attribute_text(&self, index: usize, name: &str) -> String {
        self.attributes
            .get(index)
            .and_then(|attrs| attrs.get(name))
            .map(AttributeValue::as_text)
            .unwrap_or_default()
    }

    pub fn attribute_texts(&self, name: &str) -> Vec<String> {
        (0..self.len())
            .map(|i| self.attribute_text(i, name))
            .collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.attribute_texts(TITLE_FIELD)
    }
}

/// Reads every vector, key and title from the store at `path`.
///
/// # Errors
/// Fails if the file isn't a store, a record is corrupt, or the vectors don't
/// all share one dimensionality.
pub fn load(path: impl AsRef<Path>) -> Result<LoadedEmbeddings, VectorStoreError> {
    load_with_attributes(path, &[TITLE_FIELD])
}

/// Like [`load`], keeping the named attributes instead of only the title.
///
/// # Errors
/// See [`load`].
pub fn load_with_attributes(
    path: impl AsRef<Path>,
    names: &[&str],
) -> Result<LoadedEmbeddings, VectorStoreError> {
    EmbeddingStore::open(path)?.load_attributes(names)
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> VectorStoreError + '_ {
    move |source| VectorStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
