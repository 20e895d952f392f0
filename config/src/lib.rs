//! Configuration loading, parsing, and persistence for promptq.
//!
//! Config lives at `~/.promptq/config.toml`. Every section is optional; a
//! missing file is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SESSION: &str = "default";

const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct PromptqConfig {
    pub app: Option<AppConfig>,
    pub queue: Option<QueueConfig>,
    pub retry: Option<RetryConfig>,
    pub backend: Option<BackendConfig>,
    pub network: Option<NetworkConfig>,
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Session identifier selecting the draft store file.
    pub session: Option<String>,
    /// Use ASCII-only glyphs for status badges.
    #[serde(default)]
    pub ascii_only: bool,
    /// Enable a high-contrast color palette.
    #[serde(default)]
    pub high_contrast: bool,
}

/// ```toml
/// [queue]
/// dispatch_delay_ms = 100
/// history_limit = 100
/// ```
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Pause between one settled send and the next selection.
    pub dispatch_delay_ms: u64,
    /// Maximum number of sent entries kept in history.
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dispatch_delay_ms: 100,
            history_limit: 100,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }
}

/// Backoff applied to failed sends.
///
/// ```toml
/// [retry]
/// initial_delay_ms = 500
/// max_delay_ms = 30000
/// jitter_factor = 0.25
/// max_attempts = 0
/// ```
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay that may be shaved off at random (0.0..=1.0).
    pub jitter_factor: f64,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.25,
            max_attempts: 0,
        }
    }
}

/// Chat backend that receives queued prompts.
///
/// ```toml
/// [backend]
/// url = "https://helix.example.com"
/// api_key = "${PROMPTQ_API_KEY}"
/// session_id = "ses_123"
/// request_timeout_secs = 30
/// ```
#[derive(Default, Deserialize)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub session_id: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

// Manual Debug impl to prevent leaking the API key in logs.
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = if self.api_key.is_some() {
            "[REDACTED]"
        } else {
            "None"
        };
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("api_key", &key)
            .field("session_id", &self.session_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    /// API key with `${VAR}` references expanded. Empty results count as unset.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.trim().is_empty())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(30))
    }
}

/// ```toml
/// [network]
/// probe = true
/// probe_interval_secs = 5
/// ```
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub probe: bool,
    pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe: true,
            probe_interval_secs: 5,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Remote prompt-history sync. Disabled unless `spec_task_id` is set.
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    pub project_id: Option<String>,
    pub spec_task_id: Option<String>,
}

impl SyncConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.spec_task_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }
}

/// Expand `${VAR}` references from the environment.
///
/// Unset variables expand to the empty string; an unclosed `${` is kept
/// verbatim.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl PromptqConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {}", path.display(), err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {}: {}", path.display(), err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Active session: `PROMPTQ_SESSION`, then `[app] session`, then `"default"`.
    #[must_use]
    pub fn session(&self) -> String {
        env::var("PROMPTQ_SESSION")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.app.as_ref().and_then(|app| app.session.clone()))
            .unwrap_or_else(|| DEFAULT_SESSION.to_string())
    }

    /// Backend base URL: `PROMPTQ_BACKEND_URL`, then `[backend] url`.
    #[must_use]
    pub fn backend_url(&self) -> Option<String> {
        env::var("PROMPTQ_BACKEND_URL")
            .ok()
            .or_else(|| self.backend.as_ref().and_then(|b| b.url.clone()))
            .map(|url| expand_env_vars(&url))
            .filter(|url| !url.trim().is_empty())
    }

    #[must_use]
    pub fn queue(&self) -> QueueConfig {
        self.queue.unwrap_or_default()
    }

    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        self.retry.unwrap_or_default()
    }

    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        self.network.unwrap_or_default()
    }

    /// Save the active session to `[app] session`, keeping the rest of the
    /// file (comments included) as written.
    pub fn persist_session(session: &str) -> std::io::Result<()> {
        let path = config_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            )
        })?;
        persist_session_at(&path, session)
    }
}

pub fn persist_session_at(path: &Path, session: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        restrict_if_owned(parent, 0o700)?;
    }

    let content = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    if !doc.contains_key("app") {
        doc["app"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc["app"]["session"] = toml_edit::value(session);

    promptq_utils::atomic_write(path, doc.to_string().as_bytes())?;
    restrict_if_owned(path, 0o600)
}

/// Tighten permissions on `path` to `mode`, but only when we own it and it is
/// currently group/world accessible.
#[cfg(unix)]
fn restrict_if_owned(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let metadata = fs::metadata(path)?;
    // SAFETY: getuid has no preconditions and cannot fail.
    let our_uid = unsafe { libc::getuid() };
    if metadata.uid() == our_uid && metadata.permissions().mode() & 0o077 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_if_owned(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// `~/.promptq`, the root for config, sessions, and logs.
pub fn promptq_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".promptq"))
}

pub fn config_path() -> Option<PathBuf> {
    promptq_home().map(|dir| dir.join("config.toml"))
}
