//! Source scrapers.
//!
//! Each source implements `Scraper`: fetch through the supplied `Fetcher`
//! and parse the result into raw records. Validation, deduplication and
//! persistence are handled uniformly by the runner.

mod json_api;

pub use json_api::{extract_path, JsonApiScraper};

use async_trait::async_trait;

use crate::config::ScraperConfig;
use crate::fetch::Fetcher;
use crate::models::RawRecord;

#[async_trait]
pub trait Scraper: Send {
    /// Static descriptor of the source.
    fn config(&self) -> &ScraperConfig;

    /// Fetch and parse the source's current listings.
    async fn scrape(&mut self, fetcher: &mut Fetcher) -> anyhow::Result<Vec<RawRecord>>;
}
