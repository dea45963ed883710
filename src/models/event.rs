//! Canonical job fair event records.
//!
//! `EventRecord::from_raw` is the strict constructor: it either yields a fully
//! normalized record or a `ValidationError` listing every offending field.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::datetime::{normalize_datetime, parse_iso};
use crate::config::ScraperConfig;

/// A raw scraped item: field name to loosely-typed value.
pub type RawRecord = serde_json::Map<String, Value>;

/// Default `event_type` when a source does not classify its events.
pub const DEFAULT_EVENT_TYPE: &str = "job_fair";

/// Language of an event. Unrecognised input maps to `ZhHk`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Language {
    #[default]
    #[serde(rename = "ZH-HK")]
    ZhHk,
    #[serde(rename = "EN")]
    En,
    #[serde(rename = "BOTH")]
    Both,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZhHk => "ZH-HK",
            Self::En => "EN",
            Self::Both => "BOTH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ZH-HK" => Some(Self::ZhHk),
            "EN" => Some(Self::En),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        Self::from_str(&s).unwrap_or_default()
    }
}

/// Lifecycle status of an event. Unrecognised input maps to `Upcoming`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "UPPERCASE")]
pub enum EventStatus {
    #[default]
    Upcoming,
    Ongoing,
    Past,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "UPCOMING",
            Self::Ongoing => "ONGOING",
            Self::Past => "PAST",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "UPCOMING" => Some(Self::Upcoming),
            "ONGOING" => Some(Self::Ongoing),
            "PAST" => Some(Self::Past),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl From<String> for EventStatus {
    fn from(s: String) -> Self {
        Self::from_str(&s).unwrap_or_default()
    }
}

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldIssue {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} cannot be empty")]
    Empty(&'static str),
    #[error("{field}: expected {expected}, found {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

impl FieldIssue {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing(f) | Self::Empty(f) => f,
            Self::WrongType { field, .. } => field,
        }
    }
}

/// Structured failure from strict record construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid event record: {}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Identity of the source an item was scraped from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub source_id: String,
    pub source_name: String,
    pub source_type: String,
    pub source_priority: String,
    /// Local zone of the source.
    pub offset: FixedOffset,
}

impl SourceMetadata {
    pub fn from_config(config: &ScraperConfig, offset: FixedOffset) -> Self {
        Self {
            source_id: config.source_id.clone(),
            source_name: config.name.clone(),
            source_type: config.source_type.clone(),
            source_priority: config.source_priority.clone(),
            offset,
        }
    }

    /// Write the source identity and a scrape timestamp into a record map.
    pub fn stamp(&self, record: &mut RawRecord, scraped_at: &str) {
        record.insert("source_id".into(), Value::from(self.source_id.clone()));
        record.insert("source_name".into(), Value::from(self.source_name.clone()));
        record.insert("source_type".into(), Value::from(self.source_type.clone()));
        record.insert(
            "source_priority".into(),
            Value::from(self.source_priority.clone()),
        );
        record.insert("scraped_at".into(), Value::from(scraped_at.to_string()));
    }
}

/// Canonical normalized job fair listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name_zh: Option<String>,
    /// Offset-aware RFC 3339 timestamp, or the raw value if it could not be parsed.
    pub start_datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
    pub venue_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    pub organizer_name: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_zh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    pub is_physical: bool,
    pub is_virtual: bool,
    pub language: Language,
    pub status: EventStatus,
    pub source_id: String,
    pub source_name: String,
    pub source_type: String,
    pub source_priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    /// Set when the record is persisted, never at scrape time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    /// Required fields that were filled with defaults during repair.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repaired_fields: Vec<String>,
}

impl EventRecord {
    /// Strictly construct a record from a raw scraped mapping.
    ///
    /// Unknown keys are ignored. Every problem found is reported, not just the first.
    pub fn from_raw(raw: &RawRecord, source: &SourceMetadata) -> Result<Self, ValidationError> {
        let mut fields = FieldReader::new(raw);

        let event_name = fields.required_text("event_name");
        let start_datetime = fields
            .required_text("start_datetime")
            .map(|v| normalize_datetime(&v, source.offset));
        let venue_name = fields.required_text("venue_name");
        let organizer_name = fields.required_text("organizer_name");

        let record = Self {
            event_name_en: fields.optional_text("event_name_en"),
            event_name_zh: fields.optional_text("event_name_zh"),
            end_datetime: fields
                .optional_text("end_datetime")
                .map(|v| normalize_datetime(&v, source.offset)),
            venue_address: fields.optional_text("venue_address"),
            district: fields.optional_text("district"),
            event_type: fields
                .optional_text("event_type")
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            description: fields.optional_text("description"),
            description_en: fields.optional_text("description_en"),
            description_zh: fields.optional_text("description_zh"),
            website_link: fields.optional_url("website_link"),
            registration_link: fields.optional_url("registration_link"),
            virtual_link: fields.optional_url("virtual_link"),
            contact_email: fields.optional_text("contact_email"),
            contact_phone: fields.optional_text("contact_phone"),
            is_physical: fields.flag("is_physical", true),
            is_virtual: fields.flag("is_virtual", false),
            language: fields
                .optional_text("language")
                .and_then(|v| Language::from_str(&v))
                .unwrap_or_default(),
            status: fields
                .optional_text("status")
                .and_then(|v| EventStatus::from_str(&v))
                .unwrap_or_default(),
            source_id: source.source_id.clone(),
            source_name: source.source_name.clone(),
            source_type: source.source_type.clone(),
            source_priority: source.source_priority.clone(),
            source_event_id: fields.optional_text("source_event_id"),
            scraped_at: None,
            raw_data: raw.get("raw_data").filter(|v| !v.is_null()).cloned(),
            repaired_fields: Vec::new(),
            // Required fields last so every issue is collected before bailing.
            event_name: event_name.unwrap_or_default(),
            start_datetime: start_datetime.unwrap_or_default(),
            venue_name: venue_name.unwrap_or_default(),
            organizer_name: organizer_name.unwrap_or_default(),
        };

        if !fields.issues.is_empty() {
            return Err(ValidationError {
                issues: fields.issues,
            });
        }
        Ok(record)
    }

    /// Whether the start timestamp survived normalization as a real timestamp.
    pub fn has_valid_start(&self, offset: FixedOffset) -> bool {
        parse_iso(&self.start_datetime, offset).is_some()
    }

    /// Serialize into a field map (absent optional fields omitted).
    pub fn to_map(&self) -> RawRecord {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => RawRecord::new(),
        }
    }
}

/// Reads typed fields out of a raw record, accumulating issues.
struct FieldReader<'a> {
    raw: &'a RawRecord,
    issues: Vec<FieldIssue>,
}

impl<'a> FieldReader<'a> {
    fn new(raw: &'a RawRecord) -> Self {
        Self {
            raw,
            issues: Vec::new(),
        }
    }

    /// Trimmed text; numbers are accepted as text, null counts as absent.
    fn text(&mut self, field: &'static str) -> Option<String> {
        match self.raw.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                self.issues.push(FieldIssue::WrongType {
                    field,
                    expected: "string",
                    found: json_type_name(other),
                });
                None
            }
        }
    }

    fn required_text(&mut self, field: &'static str) -> Option<String> {
        let present = matches!(self.raw.get(field), Some(v) if !v.is_null());
        match self.text(field) {
            Some(v) if !v.is_empty() => Some(v),
            Some(_) => {
                self.issues.push(FieldIssue::Empty(field));
                None
            }
            None if !present => {
                self.issues.push(FieldIssue::Missing(field));
                None
            }
            // Wrong type, already reported.
            None => None,
        }
    }

    fn optional_text(&mut self, field: &'static str) -> Option<String> {
        self.text(field).filter(|v| !v.is_empty())
    }

    fn optional_url(&mut self, field: &'static str) -> Option<String> {
        self.optional_text(field).map(|v| normalize_url(&v))
    }

    fn flag(&mut self, field: &'static str, default: bool) -> bool {
        match self.raw.get(field) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => true,
                "false" | "no" | "n" | "0" => false,
                "" => default,
                _ => {
                    self.issues.push(FieldIssue::WrongType {
                        field,
                        expected: "boolean",
                        found: "string",
                    });
                    default
                }
            },
            Some(other) => {
                self.issues.push(FieldIssue::WrongType {
                    field,
                    expected: "boolean",
                    found: json_type_name(other),
                });
                default
            }
        }
    }
}

/// Ensure a link carries an explicit scheme.
pub fn normalize_url(value: &str) -> String {
    let v = value.trim();
    if v.starts_with("http://") || v.starts_with("https://") {
        v.to_string()
    } else if let Some(rest) = v.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!("https://{}", v)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
