//! Browser-like request headers.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use super::user_agent::random_user_agent;

/// Headers sent with every request, besides the user agent.
///
/// `Accept-Encoding` is left to reqwest so it only advertises codecs it decodes.
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "zh-HK,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("connection", "keep-alive"),
    ("upgrade-insecure-requests", "1"),
    ("cache-control", "max-age=0"),
];

/// Build a header set with a random user agent, overlaid with `custom`.
pub fn headers<R: Rng + ?Sized>(rng: &mut R, custom: Option<&HeaderMap>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in DEFAULT_HEADERS {
        map.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    map.insert(
        USER_AGENT,
        HeaderValue::from_static(random_user_agent(rng)),
    );

    if let Some(custom) = custom {
        for (name, value) in custom {
            map.insert(name.clone(), value.clone());
        }
    }
    map
}
