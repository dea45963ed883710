//! Scraper for sources that publish listings as JSON.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::Scraper;
use crate::config::ScraperConfig;
use crate::fetch::Fetcher;
use crate::models::{json_type_name, RawRecord};

/// Reads the listing array out of `base_url` and renames fields per `field_map`.
pub struct JsonApiScraper {
    config: ScraperConfig,
}

impl JsonApiScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    /// Turn an API document into raw records.
    pub fn records_from(&self, document: &Value) -> anyhow::Result<Vec<RawRecord>> {
        let path = self.config.records_pointer.as_deref().unwrap_or("");
        let listing = extract_path(document, path)
            .as_array()
            .with_context(|| format!("no array at '{}' in API response", path))?;

        let mut records = Vec::with_capacity(listing.len());
        for (index, entry) in listing.iter().enumerate() {
            match entry {
                Value::Object(map) => records.push(rename_fields(map, &self.config.field_map)),
                other => warn!(
                    "{}: skipping entry {} (expected object, got {})",
                    self.config.name,
                    index,
                    json_type_name(other)
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Scraper for JsonApiScraper {
    fn config(&self) -> &ScraperConfig {
        &self.config
    }

    async fn scrape(&mut self, fetcher: &mut Fetcher) -> anyhow::Result<Vec<RawRecord>> {
        let url = self.config.base_url.clone();
        let document = fetcher
            .api_fetch(&url, &[], None)
            .await
            .with_context(|| format!("fetching {}", url))?;
        let records = self.records_from(&document)?;
        info!("{}: {} listings from {}", self.config.name, records.len(), url);
        Ok(records)
    }
}

/// Resolve `path` inside `data`.
///
/// A leading `/` means an RFC 6901 JSON pointer; anything else is a dot path
/// where numeric segments index arrays. An empty path is the document itself.
pub fn extract_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }
    if path.starts_with('/') {
        return data.pointer(path).unwrap_or(&Value::Null);
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => key
                .parse::<usize>()
                .ok()
                .and_then(|idx| arr.get(idx))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

fn rename_fields(map: &RawRecord, field_map: &HashMap<String, String>) -> RawRecord {
    map.iter()
        .map(|(key, value)| {
            let key = field_map.get(key).cloned().unwrap_or_else(|| key.clone());
            (key, value.clone())
        })
        .collect()
}
