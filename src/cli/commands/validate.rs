//! Validate command: normalize a file of raw records.

use std::path::Path;

use anyhow::Context;
use console::style;
use serde_json::Value;

use crate::config::Config;
use crate::models::SourceMetadata;
use crate::validation::{ValidatedItem, Validator};

use super::require_source;

pub async fn cmd_validate(config: &Config, file: &Path, source_id: &str) -> anyhow::Result<()> {
    let source = require_source(config, source_id)?;
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", file.display()))?;
    let Value::Array(entries) = value else {
        anyhow::bail!("{} must contain a JSON array of records", file.display());
    };

    let raws: Vec<_> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

    let validator = Validator::new(SourceMetadata::from_config(source, config.local_offset()));
    let items = validator.validate_all(&raws);

    let output: Vec<Value> = items.iter().map(|item| Value::Object(item.to_map())).collect();
    println!("{}", serde_json::to_string_pretty(&output)?);

    let degraded = items.iter().filter(|i| i.is_degraded()).count();
    let repaired = items.iter().filter(|i| i.is_repaired()).count();
    eprintln!(
        "{} {} records: {} valid, {} repaired, {} degraded",
        style("✓").green(),
        items.len(),
        items
            .iter()
            .filter(|i| matches!(i, ValidatedItem::Valid(_)))
            .count()
            - repaired,
        repaired,
        degraded
    );
    Ok(())
}
