// nbstore-daemon library: contents store, checkpoints and HTTP API.

pub mod api;
pub mod config;
pub mod runtime;
pub mod store;
