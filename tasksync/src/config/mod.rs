//! Configuration system for the `tasksync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::SyncSettings;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    remote: RemoteFileConfig,
    sync: SyncFileConfig,
    storage: StorageFileConfig,
}

/// `[remote]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemoteFileConfig {
    url: Option<String>,
    probe_timeout_secs: Option<u64>,
    batch_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    batch_size: Option<usize>,
    max_retries: Option<u32>,
    interval_secs: Option<u64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    database_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    // -- Remote --
    /// Base URL of the sync server.
    pub remote_url: String,
    /// Bound on the reachability probe.
    pub probe_timeout: Duration,
    /// Bound on one batch submission.
    pub batch_timeout: Duration,

    // -- Sync --
    /// Maximum items per batch (at least 1).
    pub batch_size: usize,
    /// Failed attempts before an item is given up (at least 1).
    pub max_retries: u32,
    /// Pause between runs in `sync --watch`.
    pub sync_interval: Duration,

    // -- Storage --
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:8787".to_string(),
            probe_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(30),
            batch_size: 50,
            max_retries: 3,
            sync_interval: Duration::from_secs(30),
            database_path: default_database_path(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/tasksync/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            remote_url: cli
                .remote_url
                .clone()
                .or_else(|| file.remote.url.clone())
                .unwrap_or(defaults.remote_url),
            probe_timeout: file
                .remote
                .probe_timeout_secs
                .map_or(defaults.probe_timeout, Duration::from_secs),
            batch_timeout: file
                .remote
                .batch_timeout_secs
                .map_or(defaults.batch_timeout, Duration::from_secs),
            batch_size: cli
                .batch_size
                .or(file.sync.batch_size)
                .unwrap_or(defaults.batch_size)
                .max(1),
            max_retries: cli
                .max_retries
                .or(file.sync.max_retries)
                .unwrap_or(defaults.max_retries)
                .max(1),
            sync_interval: file
                .sync
                .interval_secs
                .map_or(defaults.sync_interval, Duration::from_secs),
            database_path: cli
                .database
                .clone()
                .or_else(|| file.storage.database_path.clone())
                .unwrap_or(defaults.database_path),
        }
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub const fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            probe_timeout: self.probe_timeout,
            batch_timeout: self.batch_timeout,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-first task manager with queued sync")]
pub struct CliArgs {
    /// Base URL of the sync server.
    #[arg(long, global = true, env = "TASKSYNC_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Path to the local database (default: `<data dir>/tasksync/tasks.db`).
    #[arg(long, global = true, env = "TASKSYNC_DB")]
    pub database: Option<PathBuf>,

    /// Maximum items per sync batch.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Failed attempts before a queued change is given up.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "TASKSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tasksync.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Client subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a task.
    Add {
        /// Task title.
        title: String,
        /// Optional description.
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Change fields of a task.
    Update {
        /// Task identifier.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New description (empty string clears it).
        #[arg(long)]
        description: Option<String>,
        /// New completion flag.
        #[arg(long)]
        completed: Option<bool>,
    },
    /// Soft-delete a task.
    Delete {
        /// Task identifier.
        id: String,
    },
    /// List tasks.
    List {
        /// Include soft-deleted tasks.
        #[arg(long)]
        all: bool,
    },
    /// Show one task in detail.
    Show {
        /// Task identifier.
        id: String,
    },
    /// Re-queue a task whose sync gave up.
    Retry {
        /// Task identifier.
        id: String,
    },
    /// Reconcile the local queue with the server.
    Sync {
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
        /// Keep syncing on an interval until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Show queue size and last sync time.
    Status,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_database_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("tasksync.db"),
        |dir| dir.join("tasksync").join("tasks.db"),
    )
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("tasksync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
