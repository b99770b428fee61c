
pub mod filter;

pub use filter::{Filter, FilterOp};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::BlobContent;

/// Free-form field payload of a document
pub type Contents = Map<String, Value>;

/// A document submitted for writing.
///
/// Missing, null or mistyped fields deserialize to empty values so that
/// shape problems are reported by write validation rather than by the JSON
/// parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "DocumentInput")]
pub struct NewDocument {
    pub tag: String,
    pub contents: Contents,
}

/// Wire form of a document; `document_tag` is accepted for the tag
#[derive(Deserialize)]
struct DocumentInput {
    #[serde(default)]
    tag: Value,
    #[serde(default)]
    document_tag: Value,
    #[serde(default)]
    contents: Value,
}

impl From<DocumentInput> for NewDocument {
    fn from(input: DocumentInput) -> Self {
        let tag = match (input.tag, input.document_tag) {
            (Value::String(tag), _) if !tag.is_empty() => tag,
            (_, Value::String(tag)) => tag,
            _ => String::new(),
        };
        Self::from_value(tag, input.contents)
    }
}

impl NewDocument {
    #[inline]
    pub fn new(tag: impl Into<String>, contents: Contents) -> Self {
        Self {
            tag: tag.into(),
            contents,
        }
    }

    /// Build a document from a JSON value, which must be an object.
    #[inline]
    pub fn from_value(tag: impl Into<String>, contents: Value) -> Self {
        let contents = match contents {
            Value::Object(map) => map,
            _ => Contents::new(),
        };
        Self::new(tag, contents)
    }
}

/// A document as held by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub tag: String,
    pub contents: Contents,
}

impl From<NewDocument> for StoredDocument {
    #[inline]
    fn from(doc: NewDocument) -> Self {
        Self {
            tag: doc.tag,
            contents: doc.contents,
        }
    }
}

/// One or more documents headed for a single atomic write.
///
/// Deserializes from either a single JSON object or an array of objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "BatchInput")]
pub struct WriteBatch {
    documents: Vec<NewDocument>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchInput {
    Many(Vec<NewDocument>),
    One(NewDocument),
}

impl From<BatchInput> for WriteBatch {
    fn from(input: BatchInput) -> Self {
        match input {
            BatchInput::Many(documents) => Self { documents },
            BatchInput::One(document) => document.into(),
        }
    }
}

impl WriteBatch {
    #[inline]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[inline]
    pub fn documents(&self) -> &[NewDocument] {
        &self.documents
    }

    #[inline]
    pub fn into_documents(self) -> Vec<NewDocument> {
        self.documents
    }
}

impl From<NewDocument> for WriteBatch {
    #[inline]
    fn from(document: NewDocument) -> Self {
        Self {
            documents: vec![document],
        }
    }
}

impl From<Vec<NewDocument>> for WriteBatch {
    #[inline]
    fn from(documents: Vec<NewDocument>) -> Self {
        Self { documents }
    }
}

impl FromIterator<NewDocument> for WriteBatch {
    #[inline]
    fn from_iter<I: IntoIterator<Item = NewDocument>>(iter: I) -> Self {
        Self {
            documents: iter.into_iter().collect(),
        }
    }
}

/// A document paired with the blob its URL field points at
#[derive(Debug, Clone, PartialEq)]
pub struct MultimediaRecord {
    pub metadata: Contents,
    pub content: BlobContent,
}
