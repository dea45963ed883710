//! Frequency-based run gate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::UpdateFrequency;
use crate::storage::OutputStore;

/// Most recent output unit for a source and when it was written.
pub fn last_output(store: &OutputStore, source_name: &str) -> Option<(PathBuf, DateTime<Utc>)> {
    store
        .latest_output(source_name)
        .map(|(path, modified)| (path, DateTime::<Utc>::from(modified)))
}

/// Whether `source_name` is due for another run.
pub fn should_run(
    store: &OutputStore,
    source_name: &str,
    frequency: UpdateFrequency,
    custom_schedule: Option<&str>,
) -> bool {
    should_run_at(store, source_name, frequency, custom_schedule, Utc::now())
}

/// `should_run` against an explicit clock.
///
/// A source with no prior output always runs. Otherwise it runs once the last
/// output is strictly older than the frequency's threshold. Custom schedules
/// are not evaluated and always run.
pub fn should_run_at(
    store: &OutputStore,
    source_name: &str,
    frequency: UpdateFrequency,
    custom_schedule: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    let Some((path, last_run)) = last_output(store, source_name) else {
        debug!("No previous output for {}", source_name);
        return true;
    };

    match frequency.threshold() {
        Some(threshold) => {
            let elapsed = now.signed_duration_since(last_run);
            debug!(
                "{}: last output {} is {}s old (threshold {}s)",
                source_name,
                path.display(),
                elapsed.num_seconds(),
                threshold.num_seconds()
            );
            elapsed > threshold
        }
        None if frequency == UpdateFrequency::Custom => {
            warn!(
                "Custom schedule checking not implemented for {} ({}), defaulting to update",
                source_name,
                custom_schedule.unwrap_or("no schedule given")
            );
            true
        }
        None => true,
    }
}
