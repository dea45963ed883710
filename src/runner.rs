//! Run orchestration: schedule check, scrape, validate, deduplicate, persist.
//!
//! ```text
//! Idle -> ScheduleCheck -> Skipped
//!                       -> Fetching -> Validating -> Deduping -> Persisted | NoNewData -> Done
//! Fetching | Validating | Deduping -> Error
//! ```
//!
//! A run never propagates an error. Failures become `RunOutcome::Failed` plus
//! a log entry. Any browser session opened while fetching is closed before
//! the outcome is returned.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dedup::{deduplicate, EventMatcher, FuzzyMatcher};
use crate::fetch::{FetchSettings, Fetcher};
use crate::models::SourceMetadata;
use crate::schedule::should_run_at;
use crate::scrapers::Scraper;
use crate::storage::OutputStore;
use crate::validation::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ScheduleCheck,
    Skipped,
    Fetching,
    Validating,
    Deduping,
    Persisted,
    NoNewData,
    Done,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ScheduleCheck => "schedule_check",
            Self::Skipped => "skipped",
            Self::Fetching => "fetching",
            Self::Validating => "validating",
            Self::Deduping => "deduping",
            Self::Persisted => "persisted",
            Self::NoNewData => "no_new_data",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub scraped: usize,
    /// Items carried forward as raw mappings after failing validation.
    pub degraded: usize,
    /// Items that needed placeholder values to validate.
    pub repaired: usize,
    pub duplicates: usize,
    pub persisted: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The schedule gate said the source is not due.
    Skipped,
    /// Everything scraped was already known.
    NoNewData { counts: RunCounts },
    Persisted { path: PathBuf, counts: RunCounts },
    /// `stage` is the state the run was in when it failed.
    Failed { stage: RunState, error: String },
}

impl RunOutcome {
    /// The written output unit, if any.
    pub fn output(&self) -> Option<&Path> {
        match self {
            Self::Persisted { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn counts(&self) -> Option<RunCounts> {
        match self {
            Self::NoNewData { counts } | Self::Persisted { counts, .. } => Some(*counts),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Drives scrapers through the pipeline against one output directory.
pub struct ScrapeRunner {
    store: OutputStore,
    settings: FetchSettings,
    offset: FixedOffset,
    matcher: Arc<dyn EventMatcher>,
    ignore_schedule: bool,
}

impl ScrapeRunner {
    pub fn new(store: OutputStore, settings: FetchSettings, offset: FixedOffset) -> Self {
        Self {
            store,
            settings,
            offset,
            matcher: Arc::new(FuzzyMatcher),
            ignore_schedule: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let offset = config.local_offset();
        Self::new(
            OutputStore::new(config.data_dir(), offset),
            FetchSettings::from(config),
            offset,
        )
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn EventMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Run even when the schedule gate says the source is not due.
    pub fn ignore_schedule(mut self, ignore: bool) -> Self {
        self.ignore_schedule = ignore;
        self
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub async fn run(&self, scraper: &mut dyn Scraper) -> RunOutcome {
        self.run_at(scraper, Utc::now()).await
    }

    /// Run with `now` as the clock for the schedule gate and repair placeholders.
    /// `scraped_at` is always read from the wall clock when the unit is written.
    pub async fn run_at(&self, scraper: &mut dyn Scraper, now: DateTime<Utc>) -> RunOutcome {
        let config = scraper.config().clone();
        let mut state = RunState::Idle;
        info!("Starting {} scraper", config.name);

        transition(&mut state, RunState::ScheduleCheck, &config.name);
        if !self.ignore_schedule
            && !should_run_at(
                &self.store,
                &config.name,
                config.update_frequency,
                config.custom_schedule.as_deref(),
                now,
            )
        {
            info!(
                "No update needed for {} based on frequency {}",
                config.name, config.update_frequency
            );
            transition(&mut state, RunState::Skipped, &config.name);
            transition(&mut state, RunState::Done, &config.name);
            return RunOutcome::Skipped;
        }

        transition(&mut state, RunState::Fetching, &config.name);
        let mut fetcher = match Fetcher::new(config.clone(), self.settings) {
            Ok(fetcher) => fetcher,
            Err(e) => return self.fail(&mut state, &config.name, anyhow::Error::new(e)),
        };

        let mut counts = RunCounts::default();
        let result = self
            .execute(scraper, &mut fetcher, &mut state, &mut counts, now)
            .await;
        fetcher.close().await;

        match result {
            Ok(Some(path)) => {
                transition(&mut state, RunState::Done, &config.name);
                RunOutcome::Persisted { path, counts }
            }
            Ok(None) => {
                transition(&mut state, RunState::Done, &config.name);
                RunOutcome::NoNewData { counts }
            }
            Err(e) => self.fail(&mut state, &config.name, e),
        }
    }

    async fn execute(
        &self,
        scraper: &mut dyn Scraper,
        fetcher: &mut Fetcher,
        state: &mut RunState,
        counts: &mut RunCounts,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<PathBuf>> {
        let config = scraper.config().clone();

        let raw = scraper.scrape(fetcher).await?;
        counts.scraped = raw.len();
        info!("Scraped {} events", raw.len());

        transition(state, RunState::Validating, &config.name);
        let source = SourceMetadata::from_config(&config, self.offset);
        let validator = Validator::new(source.clone());
        let validated: Vec<_> = raw
            .iter()
            .map(|item| validator.validate_at(item, now))
            .collect();
        counts.degraded = validated.iter().filter(|v| v.is_degraded()).count();
        counts.repaired = validated.iter().filter(|v| v.is_repaired()).count();
        info!(
            "Validated {} events ({} repaired, {} degraded)",
            validated.len(),
            counts.repaired,
            counts.degraded
        );

        transition(state, RunState::Deduping, &config.name);
        let existing = self.store.load_existing(&config.name);
        let outcome = deduplicate(
            validated.iter().map(|v| v.to_map()).collect(),
            &existing,
            self.matcher.as_ref(),
        );
        counts.duplicates = outcome.duplicates;

        if outcome.kept.is_empty() {
            info!("No new events to save");
            transition(state, RunState::NoNewData, &config.name);
            return Ok(None);
        }

        counts.persisted = outcome.kept.len();
        let path = self
            .store
            .persist(&source, outcome.kept)
            .with_context(|| format!("persisting {} events", counts.persisted))?;
        info!("Saved {} new events to {}", counts.persisted, path.display());
        transition(state, RunState::Persisted, &config.name);
        Ok(Some(path))
    }

    fn fail(&self, state: &mut RunState, name: &str, error: anyhow::Error) -> RunOutcome {
        let stage = *state;
        error!("Error running {} scraper during {}: {:#}", name, stage, error);
        transition(state, RunState::Error, name);
        RunOutcome::Failed {
            stage,
            error: format!("{:#}", error),
        }
    }
}

fn transition(state: &mut RunState, next: RunState, source: &str) {
    debug!("{}: {} -> {}", source, state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{hong_kong_offset, FetchStrategy, ScraperConfig, UpdateFrequency};
    use crate::models::RawRecord;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct Canned {
        config: ScraperConfig,
        items: Vec<RawRecord>,
        fail: bool,
    }

    #[async_trait]
    impl Scraper for Canned {
        fn config(&self) -> &ScraperConfig {
            &self.config
        }

        async fn scrape(&mut self, _fetcher: &mut Fetcher) -> anyhow::Result<Vec<RawRecord>> {
            if self.fail {
                anyhow::bail!("upstream markup changed");
            }
            Ok(self.items.clone())
        }
    }

    fn canned(items: Vec<RawRecord>, fail: bool) -> Canned {
        Canned {
            config: ScraperConfig::new(
                "Labour Department",
                "http://127.0.0.1:9",
                "labour_dept",
                FetchStrategy::Static,
            )
            .with_frequency(UpdateFrequency::Daily),
            items,
            fail,
        }
    }

    fn runner(dir: &TempDir) -> ScrapeRunner {
        let settings = FetchSettings {
            delay: crate::anti_block::DelayRange::none(),
            ..FetchSettings::default()
        };
        ScrapeRunner::new(
            OutputStore::new(dir.path(), hong_kong_offset()),
            settings,
            hong_kong_offset(),
        )
    }

    fn fair(name: &str) -> RawRecord {
        json!({
            "event_name": name,
            "start_datetime": "2024-03-15",
            "venue_name": "HKCEC",
            "organizer_name": "Labour Department",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn test_persists_then_skips() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let mut scraper = canned(vec![fair("Job Expo"), fair("Job Expo")], false);

        let outcome = runner.run(&mut scraper).await;
        let counts = outcome.counts().unwrap();
        assert!(outcome.output().is_some());
        assert_eq!(counts.scraped, 2);
        assert_eq!(counts.duplicates, 1);
        assert_eq!(counts.persisted, 1);

        assert_eq!(runner.run(&mut scraper).await, RunOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_scrape_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let outcome = runner(&dir).run(&mut canned(vec![], true)).await;
        assert!(outcome.is_failure());
        assert!(outcome.counts().is_none());
        match outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, RunState::Fetching);
                assert!(error.contains("upstream markup changed"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(runner(&dir).store().outputs_for("Labour Department").is_empty());
    }

    #[tokio::test]
    async fn test_empty_scrape_is_no_new_data() {
        let dir = TempDir::new().unwrap();
        let outcome = runner(&dir).run(&mut canned(vec![], false)).await;
        assert_eq!(
            outcome,
            RunOutcome::NoNewData {
                counts: RunCounts::default()
            }
        );
        assert!(outcome.output().is_none());
    }

    struct Slow {
        inner: Canned,
        finished: Option<DateTime<Utc>>,
    }

    #[async_trait]
    impl Scraper for Slow {
        fn config(&self) -> &ScraperConfig {
            &self.inner.config
        }

        async fn scrape(&mut self, fetcher: &mut Fetcher) -> anyhow::Result<Vec<RawRecord>> {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            let items = self.inner.scrape(fetcher).await;
            self.finished = Some(Utc::now());
            items
        }
    }

    #[tokio::test]
    async fn test_scraped_at_is_taken_when_writing() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let mut scraper = Slow {
            inner: canned(vec![fair("Retail Fair")], false),
            finished: None,
        };

        let started = Utc::now() - chrono::Duration::days(3);
        let outcome = runner.run_at(&mut scraper, started).await;
        let finished = scraper.finished.unwrap();

        let saved = runner.store().load_existing("Labour Department");
        assert_eq!(saved.len(), 1);
        let scraped_at =
            DateTime::parse_from_rfc3339(saved[0]["scraped_at"].as_str().unwrap()).unwrap();
        assert!(scraped_at.timestamp_micros() >= finished.timestamp_micros());
        assert!(outcome.output().is_some());
    }

    #[tokio::test]
    async fn test_degraded_and_repaired_items_are_not_saved_twice() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir).ignore_schedule(true);
        let items = vec![
            json!({"event_name": ["not", "text"], "venue_name": "Online"}),
            json!({"venue_name": "HKU Main Building"}),
            json!({"venue_name": "HKUST Atrium"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let mut scraper = canned(items, false);

        let first = runner.run(&mut scraper).await;
        let counts = first.counts().unwrap();
        assert_eq!(counts.degraded, 1);
        assert_eq!(counts.repaired, 2);
        assert_eq!(counts.persisted, 3);

        let second = runner
            .run_at(&mut scraper, Utc::now() + chrono::Duration::hours(30))
            .await;
        match second {
            RunOutcome::NoNewData { counts } => assert_eq!(counts.duplicates, 3),
            other => panic!("expected nothing new, got {:?}", other),
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::NoNewData.to_string(), "no_new_data");
        assert_eq!(RunState::ScheduleCheck.as_str(), "schedule_check");
    }
}
