//! Fetch command: retrieve one URL the way a source would.

use anyhow::Context;

use crate::config::Config;
use crate::fetch::{FetchSettings, Fetcher};

use super::require_source;

pub async fn cmd_fetch(
    config: &Config,
    source_id: &str,
    url: &str,
    selector: Option<&str>,
) -> anyhow::Result<()> {
    let source = require_source(config, source_id)?;
    let mut fetcher = Fetcher::new(source.clone(), FetchSettings::from(config))?;

    let result = fetcher.fetch_text(url, selector).await;
    fetcher.close().await;

    let body = result.with_context(|| format!("fetching {} as {}", url, source.strategy))?;
    println!("{}", body);
    Ok(())
}
