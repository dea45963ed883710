//! Data models for job fair listings.

mod datetime;
mod event;

pub use datetime::{normalize_datetime, parse_iso};
pub use event::{
    normalize_url, EventRecord, EventStatus, FieldIssue, Language, RawRecord, SourceMetadata,
    ValidationError, DEFAULT_EVENT_TYPE,
};
pub(crate) use event::json_type_name;
