//! Fetch failures.

use std::time::Duration;

use thiserror::Error;

use crate::config::FetchStrategy;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Still rate limited by {url} after {waits} waits")]
    RateLimited { url: String, waits: u32 },

    #[error("Invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{requested} fetch used on {source_id}, which is configured as {configured}")]
    WrongStrategy {
        source_id: String,
        requested: FetchStrategy,
        configured: FetchStrategy,
    },

    #[error("Timed out after {}s waiting for '{selector}' on {url}", .timeout.as_secs_f64())]
    ElementTimeout {
        url: String,
        selector: String,
        timeout: Duration,
    },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// Whether the outer retry policy should try again.
    ///
    /// Only transport failures and HTTP error statuses qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Status { .. })
    }
}
