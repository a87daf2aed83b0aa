//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - a TOML file (`--config`, or `ingest-watch.toml` in the working directory)
//! - environment variables prefixed with `INGEST_WATCH_`
//! - command line flags, applied by the binary after loading
//!
//! Nested keys are separated with a double underscore:
//! - `INGEST_WATCH_WATCH__ROOT=/home/airavata/inputData` sets `watch.root`
//! - `INGEST_WATCH_HANDLER__PROGRAM=bash` sets `handler.program`
//! - `INGEST_WATCH_LOGGING__DEFAULT=debug` sets `logging.default`
//!
//! ```toml
//! [watch]
//! root = "/home/airavata/inputData"
//! token_component = 3
//!
//! [handler]
//! program = "bash"
//! args = ["/home/airavata/oodt/inotify/ingester.sh"]
//!
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! ingest_watch = "debug"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchOptions, DEFAULT_BUFFER_SIZE, DEFAULT_TOKEN_COMPONENT};
use crate::error::WatchError;
use crate::inotify::MAX_RECORD_LEN;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ingest-watch.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "INGEST_WATCH_";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub handler: HandlerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Directory to watch recursively
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Prefix for the path passed to the handler (defaults to `root`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<PathBuf>,

    /// Zero-based path component used as the root token
    #[serde(default = "default_token_component")]
    pub token_component: usize,

    /// Watch subdirectories that exist at startup
    #[serde(default = "default_true")]
    pub scan_existing: bool,

    /// Bytes read from inotify per batch
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HandlerConfig {
    /// Executable launched per new file; unset means log only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments placed before the root token and path
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `ingest_watch::dispatch = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            root: default_root(),
            base: None,
            token_component: default_token_component(),
            scan_existing: true,
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_token_component() -> usize {
    DEFAULT_TOKEN_COMPONENT
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load from defaults, `path` (or the default file if present) and env.
    pub fn load(path: Option<&Path>) -> Result<Self, WatchError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.is_some() && !file.exists() {
            return Err(WatchError::Config {
                reason: format!("config file {} does not exist", file.display()),
            });
        }

        Self::figment(&file).extract().map_err(WatchError::from)
    }

    fn figment(file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
    }

    /// Check values and resolve the root to an absolute path.
    pub fn validate(mut self) -> Result<Self, WatchError> {
        if self.watch.buffer_size < MAX_RECORD_LEN {
            return Err(WatchError::Config {
                reason: format!(
                    "watch.buffer_size must be at least {MAX_RECORD_LEN} bytes, got {}",
                    self.watch.buffer_size
                ),
            });
        }
        if matches!(self.handler.program.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(WatchError::Config {
                reason: "handler.program is empty".to_string(),
            });
        }

        self.watch.root = resolve_dir(&self.watch.root);
        self.watch.base = self.watch.base.as_deref().map(resolve_dir);
        Ok(self)
    }

    /// Dispatcher options derived from the `[watch]` section.
    pub fn dispatch_options(&self) -> DispatchOptions {
        let mut options = DispatchOptions::new(self.watch.root.clone());
        if let Some(base) = &self.watch.base {
            options.base = base.clone();
        }
        options.token_component = self.watch.token_component;
        options.scan_existing = self.watch.scan_existing;
        options.buffer_size = self.watch.buffer_size;
        options
    }
}

/// Make `dir` absolute without resolving symlinks.
///
/// Root tokens are positional, so the configured spelling of the root must
/// survive into every composed path.
fn resolve_dir(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(dir)
    }
}
