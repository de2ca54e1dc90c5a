// Wire types shared between the store and its transport.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Serialization format tag carried alongside document content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Structured JSON value (notebooks).
    Json,
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes, base64-encoded on the wire.
    Base64,
}

impl ContentFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Base64 => "base64",
        }
    }

    /// Entry type reported in listings for documents stored in this format.
    pub const fn document_type(self) -> DocumentType {
        match self {
            Self::Json => DocumentType::Notebook,
            Self::Text | Self::Base64 => DocumentType::File,
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "base64" => Ok(Self::Base64),
            other => Err(format!("unsupported content format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Notebook,
    File,
}

/// Opaque document content: a format tag plus the payload.
///
/// `content` is any JSON value for [`ContentFormat::Json`] and a string for
/// the text and base64 formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub format: ContentFormat,
    pub content: Value,
}

impl DocumentContent {
    pub fn json(value: Value) -> Self {
        Self { format: ContentFormat::Json, content: value }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self { format: ContentFormat::Text, content: Value::String(text.into()) }
    }

    pub fn base64(encoded: impl Into<String>) -> Self {
        Self { format: ContentFormat::Base64, content: Value::String(encoded.into()) }
    }
}

/// A document as returned by list/read/create/save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentModel {
    pub name: String,
    /// Directory part of the virtual path, unescaped (`foo/bar`, `""` for root).
    pub path: String,
    #[serde(rename = "type")]
    pub kind: DocumentType,
    pub format: ContentFormat,
    pub last_modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
    /// Omitted in directory listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl DocumentModel {
    pub fn content(&self) -> Option<DocumentContent> {
        self.content
            .clone()
            .map(|content| DocumentContent { format: self.format, content })
    }
}

/// Checkpoint summary: exactly an id and the frozen content's timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointModel {
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

/// Body of save/upload/rename requests. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    pub format: Option<ContentFormat>,
    pub content: Option<Value>,
}

impl SaveRequest {
    /// Content carried by the request, defaulting the format to JSON.
    pub fn document_content(&self) -> Option<DocumentContent> {
        self.content.clone().map(|content| DocumentContent {
            format: self.format.unwrap_or(ContentFormat::Json),
            content,
        })
    }
}

/// Skeleton used as the content of a freshly created, empty notebook.
pub fn empty_notebook(name: &str) -> Value {
    json!({
        "metadata": { "name": name },
        "nbformat": 3,
        "nbformat_minor": 0,
        "worksheets": [],
    })
}
