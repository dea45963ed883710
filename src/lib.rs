//! jobfair - Hong Kong job fair listing acquisition.
//!
//! Scrapes job fair listings from heterogeneous sources (static pages,
//! JavaScript-rendered pages, JSON APIs), normalizes them into a common
//! event record, drops events already seen, and writes one dated JSON file
//! per source per run.

#![allow(clippy::should_implement_trait)]

pub mod anti_block;
pub mod browser;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod models;
pub mod runner;
pub mod schedule;
pub mod scrapers;
pub mod storage;
pub mod validation;

pub use config::{Config, FetchStrategy, ScraperConfig, UpdateFrequency};
pub use fetch::{FetchError, Fetcher};
pub use models::{EventRecord, RawRecord};
pub use runner::{RunOutcome, RunState, ScrapeRunner};
pub use scrapers::Scraper;
