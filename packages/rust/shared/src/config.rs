//! Application configuration for novelpack.
//!
//! User config lives at `~/.novelpack/novelpack.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NovelPackError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "novelpack.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".novelpack";

// ---------------------------------------------------------------------------
// Config structs (matching novelpack.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Fan-out bounds for the fetch engine.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Remote page loading.
    #[serde(default)]
    pub browser: BrowserConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root under which each novel gets its own directory.
    #[serde(default = "default_saving_dir")]
    pub saving_dir: String,

    /// Root of the chapter cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Directory holding one sub-directory per font family.
    #[serde(default = "default_fonts_dir")]
    pub fonts_dir: String,

    /// Author written into package metadata.
    #[serde(default = "default_author")]
    pub author: String,

    /// Produce one package per volume instead of a combined one.
    #[serde(default)]
    pub separated: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            saving_dir: default_saving_dir(),
            cache_dir: default_cache_dir(),
            fonts_dir: default_fonts_dir(),
            author: default_author(),
            separated: false,
        }
    }
}

fn default_saving_dir() -> String {
    "~/novels".into()
}
fn default_cache_dir() -> String {
    "~/.novelpack/cache".into()
}
fn default_fonts_dir() -> String {
    "~/.novelpack/fonts".into()
}
fn default_author() -> String {
    "Unknown".into()
}

/// `[concurrency]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Volumes fetched at the same time.
    #[serde(default = "default_volumes")]
    pub volumes: usize,

    /// Chapters fetched at the same time within one volume.
    #[serde(default = "default_chapters")]
    pub chapters: usize,

    /// Remote sessions open at the same time, across all volumes.
    #[serde(default = "default_sessions")]
    pub sessions: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            volumes: default_volumes(),
            chapters: default_chapters(),
            sessions: default_sessions(),
        }
    }
}

fn default_volumes() -> usize {
    2
}
fn default_chapters() -> usize {
    4
}
fn default_sessions() -> usize {
    8
}

/// `[browser]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound for wait-until conditions (listing, chapter content).
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Delay between two checks of a wait-until condition.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            wait_timeout_secs: default_wait_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("novelpack/", env!("CARGO_PKG_VERSION")).into()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_wait_timeout() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    500
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Outer bound: volumes in flight.
    pub volume_concurrency: usize,
    /// Inner bound: chapters in flight per volume.
    pub chapter_concurrency: usize,
    /// Cross-cutting bound: open remote sessions.
    pub session_limit: usize,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            volume_concurrency: config.concurrency.volumes.max(1),
            chapter_concurrency: config.concurrency.chapters.max(1),
            session_limit: config.concurrency.sessions.max(1),
            user_agent: config.browser.user_agent.clone(),
            request_timeout: Duration::from_secs(config.browser.request_timeout_secs),
            wait_timeout: Duration::from_secs(config.browser.wait_timeout_secs),
            poll_interval: Duration::from_millis(config.browser.poll_interval_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.novelpack/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NovelPackError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.novelpack/novelpack.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NovelPackError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| NovelPackError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_in(&config_dir()?)
}

/// Write a default config file into `dir`, creating it if needed.
pub fn init_config_in(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| NovelPackError::io(dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| NovelPackError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NovelPackError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("saving_dir"));
        assert!(toml_str.contains("[concurrency]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.concurrency.volumes, 2);
        assert_eq!(parsed.concurrency.sessions, 8);
        assert_eq!(parsed.defaults.author, "Unknown");
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[defaults]
saving_dir = "/tmp/novels"
separated = true

[concurrency]
chapters = 6
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.saving_dir, "/tmp/novels");
        assert!(config.defaults.separated);
        assert_eq!(config.concurrency.chapters, 6);
        assert_eq!(config.concurrency.volumes, 2);
        assert_eq!(config.browser.poll_interval_ms, 500);
    }

    #[test]
    fn fetch_config_from_app_config() {
        let mut app = AppConfig::default();
        app.concurrency.sessions = 0;
        let fetch = FetchConfig::from(&app);
        assert_eq!(fetch.volume_concurrency, 2);
        assert_eq!(fetch.chapter_concurrency, 4);
        assert_eq!(fetch.session_limit, 1);
        assert_eq!(fetch.wait_timeout, Duration::from_secs(60));
    }

    #[test]
    fn init_and_load_from_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_config_in(dir.path()).expect("init");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.concurrency.chapters, 4);
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/novels"), home.join("novels"));
        }
    }
}
