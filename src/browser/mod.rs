//! Headless browser sessions for JavaScript-rendered sources.
//!
//! Uses chromiumoxide (CDP). A session is owned by exactly one `Fetcher` and
//! must be closed explicitly; the orchestrator does this on every exit path.

mod stealth;

pub use stealth::{visibility_probe, NEW_DOCUMENT_SCRIPT, STEALTH_ARGS};

#[cfg(feature = "browser")]
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;
#[cfg(feature = "browser")]
use tracing::{debug, info};

use crate::anti_block::ProxyDescriptor;
use crate::config::BrowserEngineConfig;
use crate::fetch::FetchError;

/// Interval between element-presence checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A live, stealth-configured browser with a single working tab.
#[cfg(feature = "browser")]
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    user_agent: String,
    /// Attached over DevTools rather than launched; left running on close.
    remote: bool,
}

#[cfg(feature = "browser")]
impl BrowserSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    /// Launch a headless browser, or attach to `config.remote_url` when set.
    pub async fn launch(
        config: &BrowserEngineConfig,
        user_agent: &str,
        proxy: Option<&ProxyDescriptor>,
    ) -> Result<Self, FetchError> {
        let (browser, mut handler) = match config.remote_url.as_deref() {
            Some(url) => Self::connect_remote(url, config.timeout).await?,
            None => {
                info!("Launching browser (headless={})", config.headless);
                let chrome_path = Self::find_chrome()?;

                let mut builder = BrowserConfig::builder()
                    .chrome_executable(chrome_path)
                    .request_timeout(Duration::from_secs(config.timeout))
                    .arg(format!("--user-agent={}", user_agent));
                if !config.headless {
                    builder = builder.with_head();
                }
                if let Some(proxy) = proxy {
                    builder = builder.arg(format!("--proxy-server={}", proxy.url));
                }
                for arg in STEALTH_ARGS.iter().copied().map(String::from) {
                    builder = builder.arg(arg);
                }
                for arg in &config.chrome_args {
                    builder = builder.arg(arg.clone());
                }

                let browser_config = builder.build().map_err(|e| {
                    FetchError::Browser(format!("invalid browser config: {}", e))
                })?;
                Browser::launch(browser_config)
                    .await
                    .map_err(|e| FetchError::Browser(format!("failed to launch: {}", e)))?
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            page: None,
            user_agent: user_agent.to_string(),
            remote: config.remote_url.is_some(),
        })
    }

    fn find_chrome() -> Result<PathBuf, FetchError> {
        for path in Self::CHROME_PATHS {
            let p = Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        debug!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(FetchError::Browser(
            "Chrome/Chromium not found; install it or set BROWSER_URL to a remote DevTools endpoint"
                .to_string(),
        ))
    }

    async fn connect_remote(
        url: &str,
        timeout: u64,
    ) -> Result<(Browser, chromiumoxide::handler::Handler), FetchError> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let version: serde_json::Value = reqwest::get(&version_url)
            .await
            .map_err(|e| FetchError::Browser(format!("remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| FetchError::Browser(format!("bad browser version info: {}", e)))?;

        let ws_url = version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FetchError::Browser("no webSocketDebuggerUrl in response".into()))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(timeout),
            ..Default::default()
        };
        Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| FetchError::Browser(format!("failed to connect: {}", e)))
    }

    async fn page(&mut self) -> Result<&Page, FetchError> {
        if self.page.is_none() {
            let page = self
                .browser
                .new_page("about:blank")
                .await
                .map_err(browser_error)?;
            page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
                .await
                .map_err(browser_error)?;
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
                NEW_DOCUMENT_SCRIPT,
            ))
            .await
            .map_err(browser_error)?;
            self.page = Some(page);
        }
        self.page
            .as_ref()
            .ok_or_else(|| FetchError::Browser("no page".to_string()))
    }

    /// Navigate the working tab to `url`.
    pub async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        let page = self.page().await?;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| FetchError::Browser(format!("invalid URL {}: {}", url, e)))?;
        page.execute(params).await.map_err(browser_error)?;
        page.wait_for_navigation().await.map_err(browser_error)?;
        Ok(())
    }

    /// Poll until an element matches `selector` or `timeout` elapses.
    pub async fn wait_for_selector(
        &self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), FetchError> {
        let page = self.current_page()?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if page.find_element(selector).await.is_ok() {
                debug!("Selector '{}' found", selector);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FetchError::ElementTimeout {
                    url: url.to_string(),
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Whether an element matching `selector` exists and is displayed.
    pub async fn is_element_visible(&self, selector: &str) -> bool {
        let Ok(page) = self.current_page() else {
            return false;
        };
        match page.evaluate(visibility_probe(selector)).await {
            Ok(result) => result.into_value::<bool>().unwrap_or(false),
            Err(e) => {
                debug!("Visibility probe for '{}' failed: {}", selector, e);
                false
            }
        }
    }

    /// Rendered markup of the current document.
    pub async fn content(&self) -> Result<String, FetchError> {
        self.current_page()?.content().await.map_err(browser_error)
    }

    /// Close the tab and browser, and stop the CDP handler.
    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }
        if !self.remote {
            if let Err(e) = self.browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
            let _ = self.browser.wait().await;
        }
        self.handler.abort();
    }

    fn current_page(&self) -> Result<&Page, FetchError> {
        self.page
            .as_ref()
            .ok_or_else(|| FetchError::Browser("no page loaded".to_string()))
    }
}

#[cfg(feature = "browser")]
fn browser_error(e: chromiumoxide::error::CdpError) -> FetchError {
    FetchError::Browser(e.to_string())
}

#[cfg(not(feature = "browser"))]
const NOT_COMPILED: &str = "Browser support not compiled. Rebuild with: cargo build --features browser";

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserSession {
    _private: (),
}

#[cfg(not(feature = "browser"))]
impl BrowserSession {
    pub async fn launch(
        _config: &BrowserEngineConfig,
        _user_agent: &str,
        _proxy: Option<&ProxyDescriptor>,
    ) -> Result<Self, FetchError> {
        Err(FetchError::Browser(NOT_COMPILED.to_string()))
    }

    pub async fn navigate(&mut self, _url: &str) -> Result<(), FetchError> {
        Err(FetchError::Browser(NOT_COMPILED.to_string()))
    }

    pub async fn wait_for_selector(
        &self,
        _url: &str,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), FetchError> {
        Err(FetchError::Browser(NOT_COMPILED.to_string()))
    }

    pub async fn is_element_visible(&self, _selector: &str) -> bool {
        false
    }

    pub async fn content(&self) -> Result<String, FetchError> {
        Err(FetchError::Browser(NOT_COMPILED.to_string()))
    }

    pub async fn close(self) {}
}
