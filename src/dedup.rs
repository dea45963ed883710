//! Duplicate detection against previously persisted events.

use serde_json::Value;
use tracing::{debug, info};

use crate::models::RawRecord;

/// Decides whether two event mappings describe the same event.
pub trait EventMatcher: Send + Sync {
    fn matches(&self, candidate: &RawRecord, existing: &RawRecord) -> bool;
}

/// Fields written at persistence time; they say nothing about the event.
const STAMPED_FIELDS: &[&str] = &[
    "source_id",
    "source_name",
    "source_type",
    "source_priority",
    "scraped_at",
    "repaired_fields",
];

/// Same name and venue (ignoring case and whitespace) on the same start date.
///
/// Records without a usable name (degraded items) and records holding
/// placeholder values (repaired items) are instead compared on their full
/// content, leaving out stamped metadata and placeholder fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyMatcher;

impl EventMatcher for FuzzyMatcher {
    fn matches(&self, candidate: &RawRecord, existing: &RawRecord) -> bool {
        let name = folded(candidate, "event_name");
        if name.is_none() || is_repaired(candidate) || is_repaired(existing) {
            return match content(candidate) {
                Some(key) => Some(key) == content(existing),
                None => false,
            };
        }
        name == folded(existing, "event_name")
            && folded(candidate, "venue_name") == folded(existing, "venue_name")
            && start_date(candidate) == start_date(existing)
    }
}

fn repaired_fields(record: &RawRecord) -> Vec<&str> {
    match record.get("repaired_fields") {
        Some(Value::Array(fields)) => fields.iter().filter_map(|f| f.as_str()).collect(),
        _ => Vec::new(),
    }
}

fn is_repaired(record: &RawRecord) -> bool {
    !repaired_fields(record).is_empty()
}

/// What the source actually supplied, plus which fields it left out.
/// `None` when nothing is left to compare.
fn content(record: &RawRecord) -> Option<(RawRecord, Vec<&str>)> {
    let mut repaired = repaired_fields(record);
    let key: RawRecord = record
        .iter()
        .filter(|(field, _)| {
            !STAMPED_FIELDS.contains(&field.as_str()) && !repaired.contains(&field.as_str())
        })
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    if key.is_empty() {
        return None;
    }
    repaired.sort_unstable();
    Some((key, repaired))
}

fn folded(record: &RawRecord, field: &str) -> Option<String> {
    let text = match record.get(field)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let folded = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    (!folded.is_empty()).then_some(folded)
}

fn start_date(record: &RawRecord) -> Option<String> {
    let start = record.get("start_datetime")?.as_str()?.trim();
    Some(start.chars().take(10).collect())
}

/// Result of filtering a batch against existing events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub kept: Vec<RawRecord>,
    pub duplicates: usize,
}

/// Drop items that match an existing event or an item kept earlier in the batch.
pub fn deduplicate(
    new_items: Vec<RawRecord>,
    existing: &[RawRecord],
    matcher: &dyn EventMatcher,
) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();

    for item in new_items {
        let duplicate = existing
            .iter()
            .chain(outcome.kept.iter())
            .any(|other| matcher.matches(&item, other));

        if duplicate {
            debug!(
                "Duplicate event found: {}",
                item.get("event_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<unnamed>")
            );
            outcome.duplicates += 1;
        } else {
            outcome.kept.push(item);
        }
    }

    info!("Deduplicated {} events", outcome.duplicates);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, venue: &str, start: &str) -> RawRecord {
        json!({"event_name": name, "venue_name": venue, "start_datetime": start})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_fuzzy_match_ignores_case_and_spacing() {
        let a = event("Job Expo 2024", "HK Convention  Centre", "2024-03-15T10:00:00+08:00");
        let b = event("job expo 2024", " hk convention centre\n", "2024-03-15T14:00:00+08:00");
        assert!(FuzzyMatcher.matches(&a, &b));
    }

    #[test]
    fn test_different_day_is_not_a_match() {
        let a = event("Job Expo", "HKCEC", "2024-03-15T10:00:00+08:00");
        let b = event("Job Expo", "HKCEC", "2024-03-16T10:00:00+08:00");
        assert!(!FuzzyMatcher.matches(&a, &b));
    }

    #[test]
    fn test_empty_items_never_match() {
        let a = RawRecord::new();
        assert!(!FuzzyMatcher.matches(&a, &a.clone()));

        let stamped = json!({"source_id": "hktdc", "scraped_at": "2024-03-15T10:00:00+08:00"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(!FuzzyMatcher.matches(&stamped, &stamped.clone()));
    }

    #[test]
    fn test_nameless_items_match_on_content() {
        let raw = json!({"event_name": ["not", "text"], "venue_name": "Online"})
            .as_object()
            .cloned()
            .unwrap();
        let mut persisted = raw.clone();
        persisted.insert("source_id".into(), json!("hktdc"));
        persisted.insert("scraped_at".into(), json!("2024-03-15T10:00:00+08:00"));
        assert!(FuzzyMatcher.matches(&raw, &persisted));

        let mut other = raw.clone();
        other.insert("venue_name".into(), json!("HKCEC"));
        assert!(!FuzzyMatcher.matches(&raw, &other));
    }

    fn repaired(venue: &str, start: &str) -> RawRecord {
        json!({
            "event_name": "Unknown Event (HKTDC)",
            "start_datetime": start,
            "venue_name": venue,
            "organizer_name": "HKTDC",
            "registration_link": format!("https://{}.example.hk", venue.to_lowercase()),
            "repaired_fields": ["event_name", "start_datetime", "organizer_name"],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_placeholders_do_not_merge_distinct_items() {
        let a = repaired("HKU", "2024-03-15T10:00:00.000000+08:00");
        let b = repaired("HKUST", "2024-03-15T10:00:00.000000+08:00");
        assert!(!FuzzyMatcher.matches(&a, &b));

        let outcome = deduplicate(vec![a, b], &[], &FuzzyMatcher);
        assert_eq!(outcome.kept.len(), 2);
        assert_eq!(outcome.duplicates, 0);
    }

    #[test]
    fn test_repaired_item_matches_its_earlier_run() {
        // The placeholder start differs from run to run.
        let first = repaired("HKU", "2024-03-15T10:00:00.000000+08:00");
        let second = repaired("HKU", "2024-03-16T09:30:00.000000+08:00");
        assert!(FuzzyMatcher.matches(&second, &first));

        let plain = event("Unknown Event (HKTDC)", "HKU", "2024-03-15T10:00:00+08:00");
        assert!(!FuzzyMatcher.matches(&plain, &first));
    }

    #[test]
    fn test_deduplicate_partitions() {
        let existing = vec![event("Job Expo", "HKCEC", "2024-03-15")];
        let outcome = deduplicate(
            vec![
                event("JOB EXPO", "hkcec", "2024-03-15T00:00:00+08:00"),
                event("Campus Fair", "HKU", "2024-04-01"),
            ],
            &existing,
            &FuzzyMatcher,
        );
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0]["event_name"], json!("Campus Fair"));
    }

    #[test]
    fn test_intra_batch_duplicates_collapse() {
        let outcome = deduplicate(
            vec![
                event("Campus Fair", "HKU", "2024-04-01"),
                event("campus fair", "HKU ", "2024-04-01"),
            ],
            &[],
            &FuzzyMatcher,
        );
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_second_pass_keeps_nothing() {
        let batch = vec![
            event("Campus Fair", "HKU", "2024-04-01"),
            event("Job Expo", "HKCEC", "2024-03-15"),
        ];
        let first = deduplicate(batch.clone(), &[], &FuzzyMatcher);
        assert_eq!(first.kept.len(), 2);

        let second = deduplicate(batch, &first.kept, &FuzzyMatcher);
        assert!(second.kept.is_empty());
        assert_eq!(second.duplicates, 2);
    }
}
