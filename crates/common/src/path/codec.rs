// Virtual path codec: percent-encoding per segment, URL joining, storage mapping.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::normalize::{check_total_length, normalize_path, normalize_segment, PathError};

/// Join URL pieces without producing doubled slashes.
///
/// Whether the first piece starts with `/` and whether the last piece ends
/// with `/` is preserved; empty segments anywhere in between collapse.
pub fn url_path_join<S: AsRef<str>>(pieces: &[S]) -> String {
    let (Some(first), Some(last)) = (pieces.first(), pieces.last()) else {
        return String::new();
    };
    let initial = first.as_ref().starts_with('/');
    let trailing = last.as_ref().ends_with('/');

    let body = pieces
        .iter()
        .flat_map(|piece| piece.as_ref().split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let mut result = String::with_capacity(body.len() + 2);
    if initial {
        result.push('/');
    }
    result.push_str(&body);
    if trailing && !result.ends_with('/') {
        result.push('/');
    }
    result
}

/// Escape special characters in a URL path, one `/`-separated piece at a time.
///
/// Turns `/foo bar/` into `/foo%20bar/`.
pub fn url_escape(path: &str) -> String {
    path.split('/').map(|piece| urlencoding::encode(piece).into_owned()).collect::<Vec<_>>().join("/")
}

/// Unescape a URL path and normalize the result to NFC.
///
/// Turns `/foo%20bar/` into `/foo bar/`.
pub fn url_unescape(path: &str) -> Result<String, PathError> {
    let pieces = path.split('/').map(decode_piece).collect::<Result<Vec<_>, _>>()?;
    Ok(pieces.join("/"))
}

fn decode_piece(piece: &str) -> Result<String, PathError> {
    let decoded =
        urlencoding::decode(piece).map_err(|_| PathError::InvalidEncoding(piece.to_string()))?;
    Ok(decoded.nfc().collect())
}

/// A location in the document hierarchy, independent of the storage medium.
///
/// Every segment is NFC-normalized and validated on construction, so two
/// `VirtualPath`s compare equal exactly when they address the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse the unescaped `a/b/c` form.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        Ok(Self { segments: normalize_path(raw)? })
    }

    /// Decode a percent-encoded URL path such as `/%C3%A5%20b/foo`.
    pub fn from_url(url: &str) -> Result<Self, PathError> {
        let segments = url
            .split('/')
            .filter(|piece| !piece.is_empty())
            .map(|piece| decode_piece(piece).and_then(|decoded| normalize_segment(&decoded)))
            .collect::<Result<Vec<_>, _>>()?;
        check_total_length(&segments)?;
        Ok(Self { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = segments
            .into_iter()
            .map(|segment| normalize_segment(segment.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        check_total_length(&segments)?;
        Ok(Self { segments })
    }

    /// Percent-encode every segment and join them with `/` (no leading slash).
    pub fn to_url(&self) -> String {
        self.segments
            .iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn join(&self, segment: &str) -> Result<Self, PathError> {
        let mut segments = self.segments.clone();
        segments.push(normalize_segment(segment)?);
        check_total_length(&segments)?;
        Ok(Self { segments })
    }

    /// The enclosing directory; `None` at the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        self.split_last().map(|(parent, _)| parent)
    }

    /// Split off the last segment, returning the parent path and that segment.
    pub fn split_last(&self) -> Option<(VirtualPath, &str)> {
        let (last, rest) = self.segments.split_last()?;
        Some((Self { segments: rest.to_vec() }, last.as_str()))
    }

    /// Map onto the storage medium below `root`, using its native separator.
    pub fn to_storage_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(self.segments.iter());
        path
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for VirtualPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.to_string()
    }
}
