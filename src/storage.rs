//! Persisted output units.
//!
//! Each run that finds something new writes one JSON array file named
//! `<slug>_<YYYY-MM-DD>.json` into the data directory. A second run on the
//! same local day gets a `_<HHMMSS>` suffix instead of overwriting.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::source_slug;
use crate::models::{RawRecord, SourceMetadata};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize events: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory of persisted output units.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
    offset: FixedOffset,
}

impl OutputStore {
    /// `offset` is the local zone used for file dates and `scraped_at`.
    pub fn new(dir: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            dir: dir.into(),
            offset,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Output units belonging to `source_name`, sorted by file name.
    pub fn outputs_for(&self, source_name: &str) -> Vec<PathBuf> {
        let slug = source_slug(source_name);
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| is_unit_name(name, &slug))
            })
            .collect();
        paths.sort();
        paths
    }

    /// The most recently modified unit for `source_name`.
    pub fn latest_output(&self, source_name: &str) -> Option<(PathBuf, SystemTime)> {
        self.outputs_for(source_name)
            .into_iter()
            .filter_map(|path| {
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .max_by_key(|(_, modified)| *modified)
    }

    /// Every event previously persisted for `source_name`.
    ///
    /// Unreadable or corrupt units are logged and skipped.
    pub fn load_existing(&self, source_name: &str) -> Vec<RawRecord> {
        let mut events = Vec::new();
        for path in self.outputs_for(source_name) {
            match read_unit(&path) {
                Ok(mut unit) => events.append(&mut unit),
                Err(e) => error!("Error loading {}: {}", path.display(), e),
            }
        }
        events
    }

    /// Stamp `items` with source metadata and write them as a new unit.
    pub fn persist(
        &self,
        source: &SourceMetadata,
        items: Vec<RawRecord>,
    ) -> Result<PathBuf, StorageError> {
        self.persist_at(source, items, Utc::now())
    }

    pub fn persist_at(
        &self,
        source: &SourceMetadata,
        mut items: Vec<RawRecord>,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;

        let local_now = now.with_timezone(&self.offset);
        let scraped_at = local_now.to_rfc3339_opts(SecondsFormat::Micros, false);
        for item in items.iter_mut() {
            source.stamp(item, &scraped_at);
        }

        let path = self.unit_path(&source_slug(&source.source_name), local_now);
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, &items)?;
        tmp.write_all(b"\n")
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StorageError::io(&path, e.error))?;

        info!("Saved {} events to {}", items.len(), path.display());
        Ok(path)
    }

    /// First free unit name for this run.
    fn unit_path(&self, slug: &str, local_now: DateTime<FixedOffset>) -> PathBuf {
        let date = local_now.format("%Y-%m-%d");
        let daily = self.dir.join(format!("{}_{}.json", slug, date));
        if !daily.exists() {
            return daily;
        }

        let stamp = local_now.format("%H%M%S");
        let timed = self.dir.join(format!("{}_{}_{}.json", slug, date, stamp));
        if !timed.exists() {
            return timed;
        }

        warn!("Output {} already exists, adding a counter", timed.display());
        (2u32..)
            .map(|n| self.dir.join(format!("{}_{}_{}_{}.json", slug, date, stamp, n)))
            .find(|p| !p.exists())
            .unwrap_or(timed)
    }
}

/// `<slug>_<YYYY-MM-DD>.json` or `<slug>_<YYYY-MM-DD>_<suffix>.json`.
///
/// The full date must follow the slug, so `job` does not claim
/// `job_market_*` or `job_2024_expo_*` files.
fn is_unit_name(name: &str, slug: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(slug)
        .and_then(|r| r.strip_prefix('_'))
        .and_then(|r| r.strip_suffix(".json"))
    else {
        return false;
    };
    let Some(date) = rest.get(..10) else {
        return false;
    };
    let tail = &rest[10..];
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
        && (tail.is_empty() || tail.starts_with('_'))
}

fn read_unit(path: &Path) -> anyhow::Result<Vec<RawRecord>> {
    let contents = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)?;
    let Value::Array(items) = value else {
        anyhow::bail!("expected a JSON array of events");
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => records.push(map),
            other => warn!("Skipping non-object entry in {}: {}", path.display(), other),
        }
    }
    Ok(records)
}
