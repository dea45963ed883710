//! Status command for showing per-source schedule state.

use std::path::Path;

use chrono::Utc;
use console::style;

use crate::config::Config;
use crate::schedule::{last_output, should_run_at};
use crate::storage::OutputStore;

/// Print one line per configured source.
pub fn cmd_status(config: &Config, data_dir: &Path) -> anyhow::Result<()> {
    if config.sources.is_empty() {
        println!(
            "{} No sources configured. Add a [sources.<id>] table to jobfair.toml.",
            style("!").yellow()
        );
        return Ok(());
    }

    let store = OutputStore::new(data_dir, config.local_offset());
    let now = Utc::now();
    let separator = "─".repeat(78);

    println!();
    println!("{}  {}", style("jobfair status").bold(), data_dir.display());
    println!("{}", separator);
    println!(
        "{:<20} {:<9} {:<8} {:<28} {}",
        "SOURCE", "STRATEGY", "FREQ", "LAST OUTPUT", "DUE"
    );

    for (id, source) in &config.sources {
        let (last, age) = match last_output(&store, &source.name) {
            Some((path, written)) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let hours = now.signed_duration_since(written).num_minutes() as f64 / 60.0;
                (name, format!("{:.1}h ago", hours))
            }
            None => ("-".to_string(), String::new()),
        };

        let due = should_run_at(
            &store,
            &source.name,
            source.update_frequency,
            source.custom_schedule.as_deref(),
            now,
        );
        let due = if due {
            style("yes").green()
        } else {
            style("no").dim()
        };

        println!(
            "{:<20} {:<9} {:<8} {:<28} {} {}",
            id,
            source.strategy.as_str(),
            source.update_frequency.as_str(),
            last,
            due,
            style(age).dim()
        );
    }
    println!("{}", separator);
    Ok(())
}
