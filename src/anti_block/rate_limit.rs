//! Rate-limit detection and wait computation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use scraper::Html;

/// Headers whose value `0` means the request budget is exhausted.
const REMAINING_HEADERS: &[&str] = &[
    "x-ratelimit-remaining",
    "ratelimit-remaining",
    "x-rate-limit-remaining",
];

/// Headers carrying the epoch second at which the budget resets.
const RESET_HEADERS: &[&str] = &["x-ratelimit-reset", "ratelimit-reset", "x-rate-limit-reset"];

/// Phrases that mark an HTML page as a block page (matched lower-cased).
const BLOCK_PHRASES: &[&str] = &[
    "rate limit",
    "too many requests",
    "access denied",
    "blocked",
    "captcha",
];

/// Default wait when a rate-limited response carries no usable hint.
pub const DEFAULT_RATE_LIMIT_WAIT: u64 = 60;

/// The parts of an HTTP response rate-limit classification looks at.
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ResponseSnapshot {
    pub fn new(status: u16, headers: HashMap<String, String>, body: String) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| ct.trim().to_lowercase().starts_with("text/html"))
            .unwrap_or(false)
    }
}

/// Extract headers from a reqwest header map, lower-casing names.
pub fn extract_response_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }
    map
}

/// Whether the response looks like the server is throttling or blocking us.
pub fn is_rate_limited(response: &ResponseSnapshot) -> bool {
    if response.status == 429 || response.status == 403 {
        return true;
    }

    let exhausted = REMAINING_HEADERS.iter().any(|name| {
        response
            .header(name)
            .and_then(|v| v.trim().parse::<i64>().ok())
            == Some(0)
    });
    if exhausted {
        return true;
    }

    if response.is_html() {
        let text = visible_text(&response.body).to_lowercase();
        return BLOCK_PHRASES.iter().any(|phrase| text.contains(phrase));
    }

    false
}

/// Seconds to wait before retrying a rate-limited request.
pub fn rate_limit_wait(response: &ResponseSnapshot, default: u64) -> u64 {
    rate_limit_wait_at(response, default, Utc::now())
}

/// `rate_limit_wait` against an explicit clock.
///
/// `Retry-After` (integer seconds) wins, then the first parseable reset
/// timestamp (floored at zero), then `default`.
pub fn rate_limit_wait_at(response: &ResponseSnapshot, default: u64, now: DateTime<Utc>) -> u64 {
    if let Some(secs) = response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return secs;
    }

    for name in RESET_HEADERS {
        if let Some(reset) = response
            .header(name)
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            return reset.saturating_sub(now.timestamp()).max(0) as u64;
        }
    }

    default
}

fn visible_text(body: &str) -> String {
    let document = Html::parse_document(body);
    document.root_element().text().collect::<Vec<_>>().join(" ")
}
