// Persistence: documents on the local filesystem plus checkpoint sidecars.

pub mod atomic;
pub mod checkpoints;
pub mod content;
pub mod documents;
pub mod error;
pub mod locks;
pub mod names;
pub mod walker;

pub use checkpoints::CheckpointManager;
pub use documents::ContentsStore;
pub use error::{StoreError, StoreResult};
