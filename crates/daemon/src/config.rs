// Local configuration for the daemon.
//
// Config file: `~/.nbstore/config.toml`, overridable by `NBSTORE_*`
// environment variables and command-line flags.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use nbstore_common::types::ContentFormat;
use serde::{Deserialize, Serialize};

/// Root directory for nbstore global state: `~/.nbstore/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".nbstore"))
}

/// Path to the default config file: `~/.nbstore/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Daemon config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
}

impl DaemonConfig {
    /// Load from an explicit path, or from `~/.nbstore/config.toml` when
    /// `path` is `None`. A missing default file yields defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Apply `NBSTORE_*` environment overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `NBSTORE_ROOT_DIR` | `store.root_dir` |
    /// | `NBSTORE_LISTEN_ADDR` | `server.listen_addr` |
    /// | `NBSTORE_MAX_CHECKPOINTS` | `store.max_checkpoints` |
    /// | `NBSTORE_LOG_FILTER` | `server.log_filter` |
    /// | `NBSTORE_CORS_ORIGINS` | `server.cors_origins` (comma-separated) |
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_fn(|key| std::env::var(key))
    }

    /// Testable variant of [`DaemonConfig::apply_env`] taking an env lookup.
    fn apply_env_fn<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(root) = env("NBSTORE_ROOT_DIR") {
            self.store.root_dir = PathBuf::from(root);
        }
        if let Ok(addr) = env("NBSTORE_LISTEN_ADDR") {
            self.server.listen_addr = addr.parse().map_err(|_| {
                ConfigError::Invalid(format!("NBSTORE_LISTEN_ADDR is not a socket address: {addr}"))
            })?;
        }
        if let Ok(max) = env("NBSTORE_MAX_CHECKPOINTS") {
            self.store.max_checkpoints = max.parse().map_err(|_| {
                ConfigError::Invalid(format!("NBSTORE_MAX_CHECKPOINTS is not a number: {max}"))
            })?;
        }
        if let Ok(filter) = env("NBSTORE_LOG_FILTER") {
            self.server.log_filter = filter;
        }
        if let Ok(origins) = env("NBSTORE_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.store.validate()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Browser origins allowed to call the API. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            log_filter: "info".into(),
            cors_origins: vec!["http://localhost:8888".into(), "http://127.0.0.1:8888".into()],
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_body_bytes must be positive".into()));
        }
        Ok(())
    }
}

// ── Store config ───────────────────────────────────────────────────

/// Contents store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory backing the virtual root.
    pub root_dir: PathBuf,
    /// Upper bound on checkpoints kept per document.
    pub max_checkpoints: usize,
    /// Label used for untitled documents (`Untitled0.ipynb`).
    pub untitled_label: String,
    /// Extension given to untitled documents.
    pub default_extension: String,
    /// Name of the per-directory sidecar holding checkpoints.
    pub checkpoint_dir: String,
    /// Recognized document extensions and the format each is stored in.
    pub extensions: BTreeMap<String, ContentFormat>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            max_checkpoints: 10,
            untitled_label: "Untitled".into(),
            default_extension: "ipynb".into(),
            checkpoint_dir: ".ipynb_checkpoints".into(),
            extensions: BTreeMap::from([("ipynb".to_string(), ContentFormat::Json)]),
        }
    }
}

impl StoreConfig {
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self { root_dir: root_dir.into(), ..Self::default() }
    }

    /// Storage format for a document name, or `None` if its extension is not recognized.
    pub fn format_for(&self, name: &str) -> Option<ContentFormat> {
        let (stem, extension) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        self.extensions.get(&extension.to_ascii_lowercase()).copied()
    }

    pub fn is_document_name(&self, name: &str) -> bool {
        self.format_for(name).is_some()
    }

    /// Whether a path segment is reserved for store bookkeeping.
    pub fn is_reserved(&self, segment: &str) -> bool {
        segment == self.checkpoint_dir
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_checkpoints == 0 {
            return Err(ConfigError::Invalid("store.max_checkpoints must be at least 1".into()));
        }
        if self.untitled_label.is_empty() || self.untitled_label.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "store.untitled_label is not a valid name prefix: {:?}",
                self.untitled_label
            )));
        }
        if !self.extensions.contains_key(&self.default_extension.to_ascii_lowercase()) {
            return Err(ConfigError::Invalid(format!(
                "store.default_extension `{}` is not listed in store.extensions",
                self.default_extension
            )));
        }
        if self.checkpoint_dir.is_empty() || self.checkpoint_dir.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "store.checkpoint_dir must be a single path segment: {:?}",
                self.checkpoint_dir
            )));
        }
        Ok(())
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}
