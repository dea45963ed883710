//! Configuration management for jobfair.
//!
//! Configuration is discovered with the prefer crate (or given explicitly)
//! and parsed with serde according to the file extension.

pub mod browser;
pub mod scraper;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anti_block::DelayRange;

pub use browser::BrowserEngineConfig;
pub use scraper::{source_slug, FetchStrategy, ScraperConfig, UpdateFrequency};

/// Default output directory, relative to the config file or CWD.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Hong Kong does not observe DST, so a fixed offset is exact.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

/// Configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding persisted output units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Offset of the sources' local zone; naive timestamps are assumed to be in it.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Lower bound of the randomized pre-request delay, in seconds.
    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: f64,
    /// Upper bound (exclusive) of the randomized pre-request delay, in seconds.
    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: f64,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Consecutive rate-limit waits before a request is abandoned.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    /// Wait used when a rate-limited response carries no usable hint, in seconds.
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_default_wait: u64,
    /// Source configurations keyed by source id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, ScraperConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_utc_offset_hours() -> i32 {
    DEFAULT_UTC_OFFSET_HOURS
}

fn default_delay_min_secs() -> f64 {
    1.0
}

fn default_delay_max_secs() -> f64 {
    5.0
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_rate_limit_waits() -> u32 {
    3
}

fn default_rate_limit_wait() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            utc_offset_hours: default_utc_offset_hours(),
            delay_min_secs: default_delay_min_secs(),
            delay_max_secs: default_delay_max_secs(),
            request_timeout: default_request_timeout(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            rate_limit_default_wait: default_rate_limit_wait(),
            sources: BTreeMap::new(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults when no config file is found or it cannot be parsed.
    pub async fn load() -> Self {
        match prefer::load("jobfair").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config text in the format implied by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        let mut config: Config = match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            })?,
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            })?,
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            })?,
        };

        for (key, source) in config.sources.iter_mut() {
            source.fill_identity(key);
        }
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Effective output directory.
    /// Priority: JOBFAIR_DATA_DIR > config `data_dir` > `./data`.
    pub fn data_dir(&self) -> PathBuf {
        let base_dir = self
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        if let Some(dir) = std::env::var("JOBFAIR_DATA_DIR")
            .ok()
            .filter(|s| !s.is_empty())
        {
            return self.resolve_path(&dir, &base_dir);
        }

        let configured = self.data_dir.as_deref().unwrap_or(DEFAULT_DATA_DIR);
        self.resolve_path(configured, &base_dir)
    }

    /// Fixed offset of the sources' local zone.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| {
            tracing::warn!(
                "utc_offset_hours {} out of range, using +{:02}:00",
                self.utc_offset_hours,
                DEFAULT_UTC_OFFSET_HOURS
            );
            hong_kong_offset()
        })
    }

    /// Randomized pre-request delay bounds.
    pub fn delay_range(&self) -> DelayRange {
        DelayRange::from_secs_f64(self.delay_min_secs, self.delay_max_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Look up a configured source by id.
    pub fn source(&self, source_id: &str) -> Option<&ScraperConfig> {
        self.sources.get(source_id)
    }
}

/// The Hong Kong offset (+08:00).
pub fn hong_kong_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600).unwrap_or_else(|| Utc.fix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_with_sources() {
        let config = Config::parse(
            r#"
            data_dir = "/var/lib/jobfair"
            delay_min_secs = 0.5

            [sources.labour_dept]
            name = "Labour Department"
            base_url = "https://www.jobs.gov.hk"
            source_type = "GOVERNMENT"
            strategy = "static"
            update_frequency = "weekly"

            [sources.ctgoodjobs]
            base_url = "https://api.example.hk/fairs"
            strategy = "api"
            records_pointer = "/data"
            "#,
            "toml",
        )
        .unwrap();

        assert_eq!(config.delay_min_secs, 0.5);
        assert_eq!(config.delay_max_secs, 5.0);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/jobfair"));

        let labour = config.source("labour_dept").unwrap();
        assert_eq!(labour.source_id, "labour_dept");
        assert_eq!(labour.update_frequency, UpdateFrequency::Weekly);

        let api = config.source("ctgoodjobs").unwrap();
        assert_eq!(api.name, "ctgoodjobs");
        assert_eq!(api.strategy, FetchStrategy::Api);
    }

    #[test]
    fn test_parse_yaml() {
        let config = Config::parse(
            "utc_offset_hours: 8\nsources:\n  hkust:\n    base_url: https://career.hkust.edu.hk\n    strategy: rendered\n",
            "yaml",
        )
        .unwrap();
        assert_eq!(
            config.source("hkust").unwrap().strategy,
            FetchStrategy::Rendered
        );
    }

    #[test]
    fn test_parse_error_names_format() {
        let err = Config::parse("{not json", "json").unwrap_err();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_local_offset_defaults_to_hong_kong() {
        let config = Config::default();
        assert_eq!(config.local_offset().local_minus_utc(), 8 * 3600);

        let broken = Config {
            utc_offset_hours: 99,
            ..Config::default()
        };
        assert_eq!(broken.local_offset(), hong_kong_offset());
    }

    #[tokio::test]
    async fn test_load_from_path_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobfair.json");
        std::fs::write(&path, r#"{"data_dir": "out"}"#).unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.base_dir().unwrap(), dir.path());
        if std::env::var("JOBFAIR_DATA_DIR").is_err() {
            assert_eq!(config.data_dir(), dir.path().join("out"));
        }
    }
}
