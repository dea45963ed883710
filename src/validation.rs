//! Validation and normalization of scraped items.
//!
//! Strict construction first; on failure the four required fields are filled
//! with placeholders and construction is retried once. If that also fails the
//! raw item is carried forward untouched as a degraded result. Nothing here
//! returns an error to the caller.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::models::{EventRecord, RawRecord, SourceMetadata};

/// Placeholder venue for repaired records.
pub const UNKNOWN_VENUE: &str = "To be announced";

/// Outcome of validating one scraped item.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedItem {
    Valid(EventRecord),
    /// Failed strict construction and repair; the original mapping.
    Degraded(RawRecord),
}

impl ValidatedItem {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn is_repaired(&self) -> bool {
        matches!(self, Self::Valid(record) if !record.repaired_fields.is_empty())
    }

    /// Field map used for matching and persistence.
    pub fn to_map(&self) -> RawRecord {
        match self {
            Self::Valid(record) => record.to_map(),
            Self::Degraded(raw) => raw.clone(),
        }
    }

    pub fn event_name(&self) -> Option<String> {
        match self {
            Self::Valid(record) => Some(record.event_name.clone()),
            Self::Degraded(raw) => raw
                .get("event_name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

/// Validates items for one source.
#[derive(Debug, Clone)]
pub struct Validator {
    source: SourceMetadata,
}

impl Validator {
    pub fn new(source: SourceMetadata) -> Self {
        Self { source }
    }

    pub fn validate(&self, raw: &RawRecord) -> ValidatedItem {
        self.validate_at(raw, Utc::now())
    }

    /// Validate with `now` as the placeholder start time for repairs.
    pub fn validate_at(&self, raw: &RawRecord, now: DateTime<Utc>) -> ValidatedItem {
        let first = match EventRecord::from_raw(raw, &self.source) {
            Ok(record) => return self.accept(record),
            Err(e) => e,
        };
        debug!("Strict validation failed: {}", first);

        let (repaired, filled) = self.repair(raw, now);
        match EventRecord::from_raw(&repaired, &self.source) {
            Ok(mut record) => {
                record.repaired_fields = filled;
                self.accept(record)
            }
            Err(second) => {
                error!(
                    "Error validating event data after fixes ({}): {}",
                    self.source.source_name, second
                );
                ValidatedItem::Degraded(raw.clone())
            }
        }
    }

    /// Unparseable start values are kept verbatim; flag them for whoever reads the output.
    fn accept(&self, record: EventRecord) -> ValidatedItem {
        if !record.has_valid_start(self.source.offset) {
            warn!(
                "{}: start '{}' of '{}' is not a timestamp",
                self.source.source_name, record.start_datetime, record.event_name
            );
        }
        ValidatedItem::Valid(record)
    }

    pub fn validate_all(&self, raws: &[RawRecord]) -> Vec<ValidatedItem> {
        let now = Utc::now();
        raws.iter().map(|raw| self.validate_at(raw, now)).collect()
    }

    /// Fill missing or blank required fields. Returns the patched copy and the
    /// names of the fields that were filled.
    fn repair(&self, raw: &RawRecord, now: DateTime<Utc>) -> (RawRecord, Vec<String>) {
        let defaults = [
            (
                "event_name",
                format!("Unknown Event ({})", self.source.source_name),
            ),
            (
                "start_datetime",
                now.with_timezone(&self.source.offset)
                    .to_rfc3339_opts(SecondsFormat::Micros, false),
            ),
            ("venue_name", UNKNOWN_VENUE.to_string()),
            ("organizer_name", self.source.source_name.clone()),
        ];

        let mut patched = raw.clone();
        let mut filled = Vec::new();
        for (field, value) in defaults {
            if is_blank(patched.get(field)) {
                patched.insert(field.to_string(), Value::String(value));
                filled.push(field.to_string());
            }
        }
        (patched, filled)
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}
