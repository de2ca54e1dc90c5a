// Conversion between tagged document content and the bytes kept on disk.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use nbstore_common::types::{empty_notebook, ContentFormat, DocumentContent};
use serde_json::Value;

use super::error::{StoreError, StoreResult};

/// Encode `content` for a document stored in `stored_as` format.
///
/// JSON documents only accept JSON content; text and binary documents accept
/// text or base64 content.
pub fn encode(stored_as: ContentFormat, content: &DocumentContent) -> StoreResult<Vec<u8>> {
    match (stored_as, content.format) {
        (ContentFormat::Json, ContentFormat::Json) => {
            let mut bytes = serde_json::to_vec_pretty(&content.content)
                .map_err(|e| StoreError::invalid(format!("content is not serializable: {e}")))?;
            bytes.push(b'\n');
            Ok(bytes)
        }
        (ContentFormat::Text | ContentFormat::Base64, ContentFormat::Text) => {
            Ok(expect_string(content)?.as_bytes().to_vec())
        }
        (ContentFormat::Text | ContentFormat::Base64, ContentFormat::Base64) => STANDARD
            .decode(expect_string(content)?)
            .map_err(|e| StoreError::invalid(format!("content is not valid base64: {e}"))),
        (stored_as, given) => Err(StoreError::invalid(format!(
            "format `{given}` is not supported for documents stored as `{stored_as}`"
        ))),
    }
}

/// Decode stored bytes. Text documents that are not valid UTF-8 come back as base64.
pub fn decode(stored_as: ContentFormat, bytes: Vec<u8>) -> StoreResult<(ContentFormat, Value)> {
    match stored_as {
        ContentFormat::Json => {
            let value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Storage {
                context: "parsing stored JSON document".into(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            Ok((ContentFormat::Json, value))
        }
        ContentFormat::Text => match String::from_utf8(bytes) {
            Ok(text) => Ok((ContentFormat::Text, Value::String(text))),
            Err(error) => Ok((
                ContentFormat::Base64,
                Value::String(STANDARD.encode(error.into_bytes())),
            )),
        },
        ContentFormat::Base64 => Ok((ContentFormat::Base64, Value::String(STANDARD.encode(bytes)))),
    }
}

/// Content of a freshly created document with no caller-supplied content.
pub fn default_content(stored_as: ContentFormat, name: &str) -> DocumentContent {
    match stored_as {
        ContentFormat::Json => {
            let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
            DocumentContent::json(empty_notebook(stem))
        }
        ContentFormat::Text => DocumentContent::text(""),
        ContentFormat::Base64 => DocumentContent::base64(""),
    }
}

fn expect_string(content: &DocumentContent) -> StoreResult<&str> {
    content.content.as_str().ok_or_else(|| {
        StoreError::invalid(format!("`{}` content must be a string", content.format))
    })
}
