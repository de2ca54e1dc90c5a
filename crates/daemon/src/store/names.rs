// Name allocation for untitled documents and copies.

use std::collections::HashSet;

use super::error::{StoreError, StoreResult};

/// How candidate names are generated for the n-th attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTemplate {
    /// `<label><n>.<extension>`, e.g. `Untitled0.ipynb`.
    Untitled { label: String, extension: String },
    /// `<stem>-Copy<n>.<extension>`, e.g. `a-Copy0.ipynb`.
    Copy { stem: String, extension: String },
}

impl NameTemplate {
    pub fn untitled(label: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::Untitled { label: label.into(), extension: extension.into() }
    }

    /// Template for copies of `source`, which must carry an extension.
    pub fn copy_of(source: &str) -> StoreResult<Self> {
        match source.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => {
                Ok(Self::Copy { stem: stem.to_string(), extension: extension.to_string() })
            }
            _ => Err(StoreError::invalid(format!("cannot derive a copy name from `{source}`"))),
        }
    }

    pub fn candidate(&self, n: u32) -> String {
        match self {
            Self::Untitled { label, extension } => format!("{label}{n}.{extension}"),
            Self::Copy { stem, extension } => format!("{stem}-Copy{n}.{extension}"),
        }
    }

    /// The candidate with the smallest n not present in `taken`.
    pub fn first_free(&self, taken: &HashSet<String>) -> String {
        (0..=u32::MAX)
            .map(|n| self.candidate(n))
            .find(|name| !taken.contains(name))
            .unwrap_or_else(|| self.candidate(u32::MAX))
    }
}
