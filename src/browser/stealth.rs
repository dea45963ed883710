//! Fingerprint suppression for automated Chrome.

/// Launch flags that hide the most common automation tells.
pub const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--no-sandbox",
    "--disable-gpu",
];

/// Evaluated in every new document before page scripts run.
pub const NEW_DOCUMENT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', {
    get: () => undefined,
    configurable: true
});
window.chrome = window.chrome || { runtime: {}, app: {} };
Object.defineProperty(navigator, 'languages', {
    get: () => ['zh-HK', 'zh', 'en-US', 'en'],
    configurable: true
});
Object.defineProperty(navigator, 'plugins', {
    get: () => [
        { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
        { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' }
    ],
    configurable: true
});
"#;

/// JS expression: is the first element matching `selector` rendered and visible?
pub fn visibility_probe(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
    const el = document.querySelector({quoted});
    if (!el) return false;
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    return style.display !== 'none' && style.visibility !== 'hidden' && rect.width > 0 && rect.height > 0;
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_quotes_selector() {
        let probe = visibility_probe("img[alt*='captcha'], #captcha");
        assert!(probe.contains(r#"document.querySelector("img[alt*='captcha'], #captcha")"#));
    }

    #[test]
    fn test_script_hides_webdriver() {
        assert!(NEW_DOCUMENT_SCRIPT.contains("'webdriver'"));
        assert!(STEALTH_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
    }
}
