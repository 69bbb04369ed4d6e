// Configuration loading and parsing (oddscast.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use oddscast_core::feed::{FeedConfig, FeedConfigError};
use oddscast_core::model::MatchId;
use oddscast_core::source::SourceKind;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "oddscast.toml";
pub const DEFAULT_DATASET_PATH: &str = "data/matches.json";
pub const DEFAULT_MAX_ROWS: usize = 20;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

impl From<FeedConfigError> for ConfigError {
    fn from(e: FeedConfigError) -> Self {
        match e {
            FeedConfigError::Invalid { field, message } => ConfigError::ValidationError {
                field: format!("feed.{field}"),
                message,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub feed: FeedConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub dataset: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    /// Rows printed when the match list is (re)loaded.
    pub max_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().into_config()
    }
}

// ---------------------------------------------------------------------------
// oddscast.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    source: SourceSection,
    feed: FeedSection,
    board: BoardSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SourceSection {
    kind: SourceKind,
    dataset: PathBuf,
}

impl Default for SourceSection {
    fn default() -> Self {
        SourceSection {
            kind: SourceKind::Bundled,
            dataset: PathBuf::from(DEFAULT_DATASET_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FeedSection {
    id_start: MatchId,
    id_end: MatchId,
    tick_ms: u64,
    disconnect_probability: f64,
    reconnect_delay_ms: u64,
    odds_min: f64,
    odds_max: f64,
    sample_size: usize,
    buffer: usize,
    seed: Option<u64>,
    cancel_reconnect_on_stop: bool,
}

impl Default for FeedSection {
    fn default() -> Self {
        let defaults = FeedConfig::default();
        FeedSection {
            id_start: *defaults.id_pool.start(),
            id_end: *defaults.id_pool.end(),
            tick_ms: millis(defaults.tick_period),
            disconnect_probability: defaults.disconnect_probability,
            reconnect_delay_ms: millis(defaults.reconnect_delay),
            odds_min: defaults.odds_min,
            odds_max: defaults.odds_max,
            sample_size: defaults.sample_size,
            buffer: defaults.odds_buffer,
            seed: defaults.seed,
            cancel_reconnect_on_stop: defaults.cancel_reconnect_on_stop,
        }
    }
}

impl FeedSection {
    fn into_feed_config(self) -> FeedConfig {
        FeedConfig {
            id_pool: self.id_start..=self.id_end,
            tick_period: Duration::from_millis(self.tick_ms),
            disconnect_probability: self.disconnect_probability,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            odds_min: self.odds_min,
            odds_max: self.odds_max,
            sample_size: self.sample_size,
            odds_buffer: self.buffer,
            seed: self.seed,
            cancel_reconnect_on_stop: self.cancel_reconnect_on_stop,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BoardSection {
    max_rows: usize,
}

impl Default for BoardSection {
    fn default() -> Self {
        BoardSection {
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl ConfigFile {
    fn into_config(self) -> Config {
        Config {
            source: SourceConfig {
                kind: self.source.kind,
                dataset: self.source.dataset,
            },
            feed: self.feed.into_feed_config(),
            board: BoardConfig {
                max_rows: self.board.max_rows,
            },
        }
    }

    fn assemble(self) -> Result<Config, ConfigError> {
        let config = self.into_config();
        validate(&config)?;
        Ok(config)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse and validate configuration text. `path` is only used in errors.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    file.assemble()
}

/// Load and validate a specific config file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    parse_config(&text, path)
}

/// Copy `defaults/oddscast.toml` to `config/oddscast.toml` under `base_dir`
/// if the latter is missing. Returns the copied path, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let default_path = base_dir.join("defaults").join(CONFIG_FILE_NAME);
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE_NAME);

    if target.exists() || !default_path.is_file() {
        return Ok(None);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;
    std::fs::copy(&default_path, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!(
            "failed to copy {} to {}: {e}",
            default_path.display(),
            target.display()
        ),
    })?;
    Ok(Some(target))
}

/// Config file candidates in lookup order: the project `config/` directory,
/// then the per-user config directory.
pub fn config_candidates(base_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![base_dir.join("config").join(CONFIG_FILE_NAME)];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "oddscast") {
        candidates.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    candidates
}

/// Load config relative to `base_dir`, falling back to built-in defaults when
/// no config file exists anywhere.
pub fn load_config_in(base_dir: &Path) -> Result<Config, ConfigError> {
    if let Some(copied) = ensure_config_file(base_dir)? {
        info!("Initialized {} from defaults", copied.display());
    }

    match config_candidates(base_dir).into_iter().find(|p| p.is_file()) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            load_config_from(&path)
        }
        None => {
            info!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
            Ok(Config::default())
        }
    }
}

/// Convenience wrapper: loads config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_in(&cwd)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    config.feed.validate()?;

    if config.source.kind == SourceKind::Bundled && config.source.dataset.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "source.dataset".into(),
            message: "must name a file when source.kind = \"bundled\"".into(),
        });
    }

    if config.board.max_rows == 0 {
        return Err(ConfigError::ValidationError {
            field: "board.max_rows".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
