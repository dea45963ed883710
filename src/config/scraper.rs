//! Per-source scraper configuration.
//!
//! A `ScraperConfig` is the static descriptor of one job fair source: where it
//! lives, how it must be fetched, how often it may be re-scraped and how
//! aggressively failed requests are retried.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::browser::BrowserEngineConfig;
use crate::models::Language;

/// Mechanism used to retrieve a source's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// Plain HTTP GET of server-rendered HTML.
    #[default]
    Static,
    /// Headless browser for JavaScript-rendered pages.
    #[serde(alias = "dynamic")]
    Rendered,
    /// JSON API endpoint.
    Api,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Rendered => "rendered",
            Self::Api => "api",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "static" => Some(Self::Static),
            "rendered" | "dynamic" => Some(Self::Rendered),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum interval before a source is eligible to be re-scraped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFrequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
    /// Cron-style schedule in `custom_schedule` (not evaluated, always runs).
    Custom,
    /// Anything the config file named that we do not recognise.
    #[serde(other)]
    Unknown,
}

impl UpdateFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "custom" => Self::Custom,
            _ => Self::Unknown,
        }
    }

    /// Minimum age of the last output before another run is due.
    /// `None` means the gate cannot decide from age alone.
    pub fn threshold(&self) -> Option<chrono::Duration> {
        match self {
            Self::Hourly => Some(chrono::Duration::hours(1)),
            Self::Daily => Some(chrono::Duration::hours(24)),
            Self::Weekly => Some(chrono::Duration::days(7)),
            Self::Monthly => Some(chrono::Duration::days(30)),
            Self::Custom | Self::Unknown => None,
        }
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-source descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Display name, also the prefix of persisted output files.
    #[serde(default)]
    pub name: String,
    /// Base URL for the source.
    pub base_url: String,
    /// Unique identifier for the source (defaults to its key in the config file).
    #[serde(default)]
    pub source_id: String,
    /// Source category tag (GOVERNMENT, JOB_PORTAL, ...).
    #[serde(default = "default_source_type")]
    pub source_type: String,
    /// Source priority tag (PRIMARY, SECONDARY).
    #[serde(default = "default_source_priority")]
    pub source_priority: String,
    /// How the source must be fetched.
    #[serde(default, alias = "scraper_type")]
    pub strategy: FetchStrategy,
    #[serde(default)]
    pub update_frequency: UpdateFrequency,
    /// Cron expression used when `update_frequency` is `custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_schedule: Option<String>,
    /// Primary language of the source.
    #[serde(default)]
    pub language: Language,
    /// Attempts made for transport failures before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Route requests through the configured proxy provider.
    #[serde(default)]
    pub use_proxy: bool,
    /// JSON pointer to the listing array in API responses (e.g. "/data/events").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_pointer: Option<String>,
    /// Upstream field name -> event record field name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_map: HashMap<String, String>,
    /// Browser settings for rendered sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserEngineConfig>,
}

fn default_source_type() -> String {
    "JOB_PORTAL".to_string()
}

fn default_source_priority() -> String {
    "PRIMARY".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

impl ScraperConfig {
    /// Create a config with defaults for everything but identity and strategy.
    pub fn new(name: &str, base_url: &str, source_id: &str, strategy: FetchStrategy) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            source_id: source_id.to_string(),
            source_type: default_source_type(),
            source_priority: default_source_priority(),
            strategy,
            update_frequency: UpdateFrequency::default(),
            custom_schedule: None,
            language: Language::default(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            use_proxy: false,
            records_pointer: None,
            field_map: HashMap::new(),
            browser: None,
        }
    }

    pub fn with_frequency(mut self, frequency: UpdateFrequency) -> Self {
        self.update_frequency = frequency;
        self
    }

    /// Fill identity fields left empty in a config file from the map key.
    pub(crate) fn fill_identity(&mut self, key: &str) {
        if self.source_id.is_empty() {
            self.source_id = key.to_string();
        }
        if self.name.is_empty() {
            self.name = self.source_id.clone();
        }
    }

    /// Filename prefix for this source's output units.
    pub fn slug(&self) -> String {
        source_slug(&self.name)
    }

    /// Browser settings, falling back to defaults with env overrides.
    pub fn browser_config(&self) -> BrowserEngineConfig {
        self.browser
            .clone()
            .unwrap_or_default()
            .with_env_overrides()
    }
}

/// Lower-cased source name with spaces replaced by underscores.
pub fn source_slug(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ScraperConfig = toml::from_str(
            r#"
            name = "Labour Department"
            base_url = "https://www.jobs.gov.hk"
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, FetchStrategy::Static);
        assert_eq!(config.update_frequency, UpdateFrequency::Daily);
        assert_eq!(config.language, Language::ZhHk);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_secs, 2);
        assert_eq!(config.source_type, "JOB_PORTAL");
        assert_eq!(config.source_priority, "PRIMARY");
        assert!(!config.use_proxy);
    }

    #[test]
    fn test_unknown_frequency_parses() {
        let config: ScraperConfig = serde_json::from_str(
            r#"{"base_url": "https://example.hk", "update_frequency": "fortnightly"}"#,
        )
        .unwrap();
        assert_eq!(config.update_frequency, UpdateFrequency::Unknown);
        assert!(config.update_frequency.threshold().is_none());
    }

    #[test]
    fn test_dynamic_alias_maps_to_rendered() {
        let config: ScraperConfig = serde_json::from_str(
            r#"{"base_url": "https://example.hk", "scraper_type": "dynamic"}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, FetchStrategy::Rendered);
        assert_eq!(FetchStrategy::from_str("API"), Some(FetchStrategy::Api));
    }

    #[test]
    fn test_fill_identity_and_slug() {
        let mut config = ScraperConfig::new("", "https://example.hk", "", FetchStrategy::Api);
        config.fill_identity("hkctc");
        assert_eq!(config.source_id, "hkctc");
        assert_eq!(config.name, "hkctc");

        let named = ScraperConfig::new("Job Market Fair", "https://x", "jmf", FetchStrategy::Static);
        assert_eq!(named.slug(), "job_market_fair");
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(
            UpdateFrequency::Hourly.threshold(),
            Some(chrono::Duration::hours(1))
        );
        assert_eq!(
            UpdateFrequency::Monthly.threshold(),
            Some(chrono::Duration::days(30))
        );
        assert_eq!(UpdateFrequency::from_str("WEEKLY"), UpdateFrequency::Weekly);
        assert_eq!(UpdateFrequency::from_str("cron"), UpdateFrequency::Unknown);
    }
}
