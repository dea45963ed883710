//! Run command: drive the pipeline for configured API sources.

use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{Config, FetchStrategy};
use crate::fetch::FetchSettings;
use crate::runner::{RunOutcome, ScrapeRunner};
use crate::scrapers::JsonApiScraper;
use crate::storage::OutputStore;

use super::require_source;

pub async fn cmd_run(
    config: &Config,
    data_dir: &Path,
    source_ids: &[String],
    force: bool,
) -> anyhow::Result<()> {
    let selected = if source_ids.is_empty() {
        config
            .sources
            .values()
            .filter(|s| s.strategy == FetchStrategy::Api)
            .collect::<Vec<_>>()
    } else {
        source_ids
            .iter()
            .map(|id| require_source(config, id))
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    if selected.is_empty() {
        println!("{} No API sources configured.", style("!").yellow());
        return Ok(());
    }

    let offset = config.local_offset();
    let runner = ScrapeRunner::new(
        OutputStore::new(data_dir, offset),
        FetchSettings::from(config),
        offset,
    )
    .ignore_schedule(force);

    let mut failures = 0;
    for source in selected {
        if source.strategy != FetchStrategy::Api {
            println!(
                "{} {}: no built-in scraper for {} sources, skipping",
                style("!").yellow(),
                source.source_id,
                source.strategy
            );
            continue;
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Scraping {}", source.name));
        spinner.enable_steady_tick(Duration::from_millis(100));

        let mut scraper = JsonApiScraper::new(source.clone());
        let outcome = runner.run(&mut scraper).await;
        spinner.finish_and_clear();

        match &outcome {
            RunOutcome::Skipped => println!(
                "{} {}: not due ({})",
                style("-").dim(),
                source.source_id,
                source.update_frequency
            ),
            RunOutcome::NoNewData { counts } => println!(
                "{} {}: {} scraped, {} duplicates, nothing new",
                style("=").cyan(),
                source.source_id,
                counts.scraped,
                counts.duplicates
            ),
            RunOutcome::Persisted { path, counts } => println!(
                "{} {}: {} new events -> {} ({} duplicates, {} repaired, {} degraded)",
                style("✓").green(),
                source.source_id,
                counts.persisted,
                path.display(),
                counts.duplicates,
                counts.repaired,
                counts.degraded
            ),
            RunOutcome::Failed { stage, error } => println!(
                "{} {}: failed during {}: {}",
                style("✗").red(),
                source.source_id,
                stage,
                error
            ),
        }
        if outcome.is_failure() {
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} source(s) failed", failures);
    }
    Ok(())
}
