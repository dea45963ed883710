//! Anti-blocking toolkit.
//!
//! Everything a fetch does to look less like a bot: rotating user agents and
//! browser-like headers, randomized pacing, optional proxies, rate-limit
//! detection, and the CAPTCHA hook for rendered pages.
//!
//! Randomness is drawn from an explicit `Rng`. `AntiBlocking` owns a
//! seedable `StdRng` so a seeded toolkit behaves identically across runs.

mod captcha;
mod delay;
mod headers;
mod proxy;
mod rate_limit;
mod user_agent;

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::header::HeaderMap;

pub use captcha::{
    captcha_present_and_unhandled, CaptchaSolver, UnsolvedCaptcha, DEFAULT_CAPTCHA_SELECTOR,
};
pub use delay::{random_delay, DelayRange};
pub use headers::headers;
pub use proxy::{NoProxy, ProxyDescriptor, ProxyProvider, StaticProxy};
pub use rate_limit::{
    extract_response_headers, is_rate_limited, rate_limit_wait, rate_limit_wait_at,
    ResponseSnapshot, DEFAULT_RATE_LIMIT_WAIT,
};
pub use user_agent::{random_user_agent, USER_AGENTS};

/// Per-scraper anti-blocking state.
pub struct AntiBlocking {
    rng: StdRng,
    delay: DelayRange,
    proxy: Arc<dyn ProxyProvider>,
    captcha: Arc<dyn CaptchaSolver>,
}

impl AntiBlocking {
    /// Toolkit seeded from the OS with no proxy and no CAPTCHA solving.
    pub fn new(delay: DelayRange) -> Self {
        Self::with_rng(StdRng::from_os_rng(), delay)
    }

    /// Deterministic toolkit for tests and reproducible runs.
    pub fn seeded(seed: u64, delay: DelayRange) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), delay)
    }

    fn with_rng(rng: StdRng, delay: DelayRange) -> Self {
        Self {
            rng,
            delay,
            proxy: Arc::new(NoProxy),
            captcha: Arc::new(UnsolvedCaptcha),
        }
    }

    pub fn with_proxy_provider(mut self, provider: Arc<dyn ProxyProvider>) -> Self {
        self.proxy = provider;
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha = solver;
        self
    }

    pub fn delay_range(&self) -> DelayRange {
        self.delay
    }

    pub fn user_agent(&mut self) -> &'static str {
        random_user_agent(&mut self.rng)
    }

    /// Randomized headers with `custom` overrides applied.
    pub fn headers(&mut self, custom: Option<&HeaderMap>) -> HeaderMap {
        headers(&mut self.rng, custom)
    }

    /// Proxy for the next request, if the provider has one.
    pub fn proxy(&self) -> Option<ProxyDescriptor> {
        self.proxy.next_proxy()
    }

    pub fn captcha_solver(&self) -> Arc<dyn CaptchaSolver> {
        Arc::clone(&self.captcha)
    }

    /// Sleep for a randomized duration from the configured range.
    pub async fn random_delay(&mut self) -> Duration {
        random_delay(&mut self.rng, self.delay).await
    }
}

impl Default for AntiBlocking {
    fn default() -> Self {
        Self::new(DelayRange::default())
    }
}
