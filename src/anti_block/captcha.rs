//! CAPTCHA detection hook.
//!
//! Solving is not implemented. A `CaptchaSolver` can be plugged in; the
//! default reports every challenge as unsolved so fetches continue degraded.

use async_trait::async_trait;
use tracing::warn;

use crate::browser::BrowserSession;

/// Selector matching the CAPTCHA widgets seen on job fair sites.
pub const DEFAULT_CAPTCHA_SELECTOR: &str = "img[alt*='captcha'], .captcha, #captcha";

/// Attempts to clear a CAPTCHA shown in a live browser session.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Returns true if the challenge matched by `selector` was solved.
    async fn solve(&self, session: &BrowserSession, selector: &str) -> bool;
}

/// Never solves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsolvedCaptcha;

#[async_trait]
impl CaptchaSolver for UnsolvedCaptcha {
    async fn solve(&self, _session: &BrowserSession, _selector: &str) -> bool {
        false
    }
}

/// True if a visible element matches `selector` and `solver` could not clear it.
///
/// Callers should carry on with whatever the page shows and treat the result
/// as degraded.
pub async fn captcha_present_and_unhandled(
    session: &BrowserSession,
    selector: &str,
    solver: &dyn CaptchaSolver,
) -> bool {
    if !session.is_element_visible(selector).await {
        return false;
    }
    if solver.solve(session, selector).await {
        return false;
    }
    warn!(
        "CAPTCHA detected ({}) and not solved; continuing in degraded mode",
        selector
    );
    true
}
