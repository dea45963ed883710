//! Fetch layer.
//!
//! A `Fetcher` is bound to one source and exposes the three fetch strategies.
//! Each call goes through the anti-blocking toolkit: randomized headers and
//! pacing, optional proxy, and rate-limit detection with a bounded number of
//! wait-then-retry rounds. Transport failures are retried separately with
//! exponential backoff.

mod error;
mod retry;

pub use error::FetchError;
pub use retry::{RetryPolicy, MAX_BACKOFF};

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::anti_block::{
    captcha_present_and_unhandled, extract_response_headers, is_rate_limited, rate_limit_wait,
    AntiBlocking, DelayRange, ResponseSnapshot, DEFAULT_CAPTCHA_SELECTOR, DEFAULT_RATE_LIMIT_WAIT,
};
use crate::browser::BrowserSession;
use crate::config::{Config, FetchStrategy, ScraperConfig};

/// Default wait for rendered pages when no selector is given.
pub const DEFAULT_RENDER_WAIT: Duration = Duration::from_secs(10);

/// Run-wide knobs shared by every fetcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub delay: DelayRange,
    pub max_rate_limit_waits: u32,
    /// Seconds to wait when a throttled response gives no hint.
    pub rate_limit_default_wait: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            delay: DelayRange::default(),
            max_rate_limit_waits: 3,
            rate_limit_default_wait: DEFAULT_RATE_LIMIT_WAIT,
        }
    }
}

impl From<&Config> for FetchSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.request_timeout(),
            delay: config.delay_range(),
            max_rate_limit_waits: config.max_rate_limit_waits,
            rate_limit_default_wait: config.rate_limit_default_wait,
        }
    }
}

/// A successfully fetched HTTP response.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchedPage {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }
}

/// Fetches content for one source.
///
/// Owns at most one browser session, created on the first rendered fetch and
/// released by `close`.
pub struct Fetcher {
    config: ScraperConfig,
    settings: FetchSettings,
    client: Client,
    toolkit: AntiBlocking,
    retry: RetryPolicy,
    browser: Option<BrowserSession>,
}

impl Fetcher {
    pub fn new(config: ScraperConfig, settings: FetchSettings) -> Result<Self, FetchError> {
        let client = build_client(settings.timeout, None)?;
        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            toolkit: AntiBlocking::new(settings.delay),
            config,
            settings,
            client,
            browser: None,
        })
    }

    /// Replace the anti-blocking toolkit (seeded RNG, proxy provider, CAPTCHA solver).
    pub fn with_toolkit(mut self, toolkit: AntiBlocking) -> Self {
        self.toolkit = toolkit;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn has_browser_session(&self) -> bool {
        self.browser.is_some()
    }

    /// GET a server-rendered page.
    pub async fn static_fetch(
        &mut self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<FetchedPage, FetchError> {
        self.require(FetchStrategy::Static)?;
        self.fetch_with_retry(url, params, None).await
    }

    /// GET a JSON endpoint and decode the body.
    ///
    /// `headers` override the randomized defaults. `Content-Type` defaults to
    /// `application/json`.
    pub async fn api_fetch(
        &mut self,
        url: &str,
        params: &[(&str, &str)],
        headers: Option<&HeaderMap>,
    ) -> Result<Value, FetchError> {
        self.require(FetchStrategy::Api)?;

        let mut custom = headers.cloned().unwrap_or_default();
        if !custom.contains_key(CONTENT_TYPE) {
            custom.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let page = self.fetch_with_retry(url, params, Some(&custom)).await?;
        serde_json::from_str(&page.body).map_err(|source| FetchError::Decode {
            url: page.url,
            source,
        })
    }

    /// Load a page in the browser session and return the rendered markup.
    ///
    /// With a selector, waits up to `wait_time` for it to appear and fails on
    /// timeout. Without one, waits the full `wait_time`.
    pub async fn rendered_fetch(
        &mut self,
        url: &str,
        wait_selector: Option<&str>,
        wait_time: Duration,
    ) -> Result<String, FetchError> {
        self.require(FetchStrategy::Rendered)?;
        self.toolkit.random_delay().await;

        let solver = self.toolkit.captcha_solver();
        let session = self.ensure_browser().await?;

        info!("Rendering {}", url);
        session.navigate(url).await?;

        match wait_selector {
            Some(selector) => session.wait_for_selector(url, selector, wait_time).await?,
            None => tokio::time::sleep(wait_time).await,
        }

        if captcha_present_and_unhandled(session, DEFAULT_CAPTCHA_SELECTOR, solver.as_ref()).await
        {
            warn!("{} served a CAPTCHA; page content may be incomplete", url);
        }

        session.content().await
    }

    /// Fetch `url` with whatever strategy the source uses and return the body text.
    pub async fn fetch_text(
        &mut self,
        url: &str,
        wait_selector: Option<&str>,
    ) -> Result<String, FetchError> {
        match self.config.strategy {
            FetchStrategy::Static => Ok(self.static_fetch(url, &[]).await?.body),
            FetchStrategy::Rendered => {
                self.rendered_fetch(url, wait_selector, DEFAULT_RENDER_WAIT)
                    .await
            }
            FetchStrategy::Api => {
                let value = self.api_fetch(url, &[], None).await?;
                Ok(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
            }
        }
    }

    /// Tear down the browser session, if one was created.
    pub async fn close(&mut self) {
        if let Some(session) = self.browser.take() {
            debug!("Closing browser session for {}", self.config.source_id);
            session.close().await;
        }
    }

    fn require(&self, requested: FetchStrategy) -> Result<(), FetchError> {
        if self.config.strategy == requested {
            Ok(())
        } else {
            Err(FetchError::WrongStrategy {
                source_id: self.config.source_id.clone(),
                requested,
                configured: self.config.strategy,
            })
        }
    }

    async fn ensure_browser(&mut self) -> Result<&mut BrowserSession, FetchError> {
        if self.browser.is_none() {
            let browser_config = self.config.browser_config();
            let user_agent = self.toolkit.user_agent();
            let proxy = if self.config.use_proxy {
                self.toolkit.proxy()
            } else {
                None
            };

            let session = BrowserSession::launch(&browser_config, user_agent, proxy.as_ref())
                .await
                .map_err(|e| {
                    error!(
                        "Failed to start browser session for {}: {}",
                        self.config.source_id, e
                    );
                    e
                })?;
            self.browser = Some(session);
        }

        self.browser
            .as_mut()
            .ok_or_else(|| FetchError::Browser("browser session unavailable".to_string()))
    }

    async fn fetch_with_retry(
        &mut self,
        url: &str,
        params: &[(&str, &str)],
        custom: Option<&HeaderMap>,
    ) -> Result<FetchedPage, FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url, params, custom).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:.1}s",
                        attempt,
                        self.retry.max_attempts,
                        url,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One logical request, including rate-limit wait-then-retry rounds.
    async fn fetch_once(
        &mut self,
        url: &str,
        params: &[(&str, &str)],
        custom: Option<&HeaderMap>,
    ) -> Result<FetchedPage, FetchError> {
        let mut waits = 0;
        loop {
            let headers = self.toolkit.headers(custom);
            self.toolkit.random_delay().await;
            let client = self.client_for_request()?;

            debug!("GET {}", url);
            let response = client
                .get(url)
                .query(params)
                .headers(headers)
                .send()
                .await
                .map_err(|source| FetchError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let response_headers = extract_response_headers(response.headers());
            let body = response
                .text()
                .await
                .map_err(|source| FetchError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let snapshot = ResponseSnapshot::new(status, response_headers, body);
            if is_rate_limited(&snapshot) {
                if waits >= self.settings.max_rate_limit_waits {
                    return Err(FetchError::RateLimited {
                        url: url.to_string(),
                        waits,
                    });
                }
                waits += 1;
                let wait = rate_limit_wait(&snapshot, self.settings.rate_limit_default_wait);
                warn!(
                    "Rate limited by {} (HTTP {}); waiting {}s ({}/{})",
                    url, status, wait, waits, self.settings.max_rate_limit_waits
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !(200..300).contains(&status) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }

            return Ok(FetchedPage {
                url: final_url,
                status,
                headers: snapshot.headers,
                body: snapshot.body,
            });
        }
    }

    /// The shared client, or a one-off proxied client when the source wants a proxy.
    fn client_for_request(&self) -> Result<Client, FetchError> {
        if !self.config.use_proxy {
            return Ok(self.client.clone());
        }
        match self.toolkit.proxy() {
            Some(proxy) => {
                debug!("Routing {} through {}", self.config.source_id, proxy);
                let proxy = proxy.to_reqwest().map_err(FetchError::Client)?;
                build_client(self.settings.timeout, Some(proxy))
            }
            None => Ok(self.client.clone()),
        }
    }
}

fn build_client(timeout: Duration, proxy: Option<reqwest::Proxy>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .gzip(true)
        .brotli(true)
        .cookie_store(true);
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(FetchError::Client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(strategy: FetchStrategy) -> Fetcher {
        let config = ScraperConfig::new("Test Fair", "http://127.0.0.1:9", "test", strategy);
        Fetcher::new(config, FetchSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_wrong_strategy_fails_fast() {
        let mut f = fetcher(FetchStrategy::Api);
        let err = f.static_fetch("http://127.0.0.1:9/", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::WrongStrategy { .. }));

        let err = f
            .rendered_fetch("http://127.0.0.1:9/", None, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::WrongStrategy {
                requested: FetchStrategy::Rendered,
                configured: FetchStrategy::Api,
                ..
            }
        ));
        assert!(!f.has_browser_session());
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            delay_min_secs: 0.0,
            delay_max_secs: 0.0,
            request_timeout: 5,
            ..Config::default()
        };
        let settings = FetchSettings::from(&config);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.delay, DelayRange::none());
        assert_eq!(settings.max_rate_limit_waits, 3);
        assert_eq!(settings.rate_limit_default_wait, 60);
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let mut config =
            ScraperConfig::new("Fair", "http://127.0.0.1:9", "fair", FetchStrategy::Static);
        config.max_retries = 5;
        let f = Fetcher::new(config, FetchSettings::default()).unwrap();
        assert_eq!(f.retry.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_close_without_session_is_noop() {
        let mut f = fetcher(FetchStrategy::Rendered);
        f.close().await;
        assert!(!f.has_browser_session());
    }
}
