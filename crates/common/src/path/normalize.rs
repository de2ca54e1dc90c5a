// Segment canonicalization: NFC normalization, traversal rejection, length limits.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed path length in characters.
pub const MAX_PATH_CHARS: usize = 512;

/// Maximum allowed length of a single segment in characters.
pub const MAX_SEGMENT_CHARS: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path exceeds maximum length of {MAX_PATH_CHARS} characters")]
    TooLong,

    #[error("path segment exceeds maximum length of {MAX_SEGMENT_CHARS} characters")]
    SegmentTooLong,

    #[error("path contains directory traversal component: {0}")]
    Traversal(String),

    #[error("path contains null byte")]
    NullByte,

    #[error("path contains invalid component: {0}")]
    InvalidComponent(String),

    #[error("path component is not valid percent-encoded UTF-8: {0}")]
    InvalidEncoding(String),
}

/// Normalize a single path segment or document name.
///
/// Rules:
/// - Apply Unicode NFC normalization
/// - Reject null bytes
/// - Reject empty and whitespace-only segments
/// - Reject `.` and `..` (traversal)
/// - Reject embedded separators (`/` or `\`)
/// - Enforce max 255 character limit (after normalization)
pub fn normalize_segment(input: &str) -> Result<String, PathError> {
    if input.contains('\0') {
        return Err(PathError::NullByte);
    }

    let normalized: String = input.nfc().collect();

    if normalized.is_empty() {
        return Err(PathError::InvalidComponent("(empty component)".to_string()));
    }
    if normalized == "." || normalized == ".." {
        return Err(PathError::Traversal(normalized));
    }
    if normalized.contains('/') || normalized.contains('\\') {
        return Err(PathError::InvalidComponent(normalized));
    }
    if normalized.trim().is_empty() {
        return Err(PathError::InvalidComponent("(whitespace-only component)".to_string()));
    }
    if normalized.chars().count() > MAX_SEGMENT_CHARS {
        return Err(PathError::SegmentTooLong);
    }

    Ok(normalized)
}

/// Normalize an unescaped `/`-separated path into its segments.
///
/// Backslashes are treated as separators, consecutive and leading/trailing
/// separators collapse, and the empty path is the root (no segments).
pub fn normalize_path(input: &str) -> Result<Vec<String>, PathError> {
    if input.contains('\0') {
        return Err(PathError::NullByte);
    }

    let unified = input.replace('\\', "/");
    let segments = unified
        .split('/')
        .filter(|s| !s.is_empty())
        .map(normalize_segment)
        .collect::<Result<Vec<_>, _>>()?;

    check_total_length(&segments)?;
    Ok(segments)
}

pub(crate) fn check_total_length(segments: &[String]) -> Result<(), PathError> {
    let joined_chars: usize = segments.iter().map(|s| s.chars().count()).sum::<usize>()
        + segments.len().saturating_sub(1);
    if joined_chars > MAX_PATH_CHARS {
        return Err(PathError::TooLong);
    }
    Ok(())
}
