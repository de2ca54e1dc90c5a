// Virtual path handling: segment normalization and the URL/storage codec.

pub mod codec;
pub mod normalize;

pub use codec::{url_escape, url_path_join, url_unescape, VirtualPath};
pub use normalize::{normalize_path, normalize_segment, PathError};
