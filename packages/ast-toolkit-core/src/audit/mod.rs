//! Audit trail export.
//!
//! The audit endpoint returns the current day's events inline and links to
//! one page per earlier day. Both shapes are flattened into [`AuditEvent`]
//! rows with a fixed column set.

mod aggregator;
pub mod timestamp;

pub use aggregator::{AuditCollection, AuditCollector, LinkFailure};

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source record as delivered by either the primary page or a link page.
///
/// Scalars are kept as raw JSON values because the platform is not
/// consistent about strings vs numbers across event types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuditEvent {
    #[serde(default)]
    pub event_date: Value,
    #[serde(default)]
    pub action_type: Value,
    #[serde(default)]
    pub action_user_id: Value,
    #[serde(default)]
    pub audit_resource: Value,
    #[serde(default)]
    pub event_type: Value,
    #[serde(default)]
    pub ip_address: Value,
    /// Nested details; only `id`, `status` and `username` are exported
    #[serde(default)]
    pub data: Value,
}

/// Pointer to an additional page of audit records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLink {
    #[serde(default)]
    pub url: Option<String>,
}

/// Response of `GET /api/audit/`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditPage {
    #[serde(default)]
    pub events: Vec<RawAuditEvent>,
    #[serde(default)]
    pub links: Vec<AuditLink>,
}

/// Response of a link URL. Older deployments return a bare array, newer ones
/// wrap it in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LinkPage {
    Events(Vec<RawAuditEvent>),
    Wrapped {
        #[serde(default)]
        events: Vec<RawAuditEvent>,
    },
}

impl LinkPage {
    pub fn into_events(self) -> Vec<RawAuditEvent> {
        match self {
            LinkPage::Events(events) | LinkPage::Wrapped { events } => events,
        }
    }
}

/// Normalized audit record, one row of the export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    #[serde(rename = "EventDate")]
    pub event_date: String,
    #[serde(rename = "EventDateISO")]
    pub event_date_iso: String,
    #[serde(rename = "actionType")]
    pub action_type: Option<String>,
    #[serde(rename = "actionUserId")]
    pub action_user_id: Option<String>,
    #[serde(rename = "auditResource")]
    pub audit_resource: Option<String>,
    pub details_id: Option<String>,
    pub details_status: Option<String>,
    pub details_username: Option<String>,
    #[serde(rename = "eventType")]
    pub event_type: Option<String>,
    #[serde(rename = "ipAddress")]
    pub ip_address: Option<String>,
    /// Parsed `eventDate`, used for range filtering
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditEvent {
    /// Column order shared by every sink.
    pub const COLUMNS: [&'static str; 10] = [
        "EventDate",
        "EventDateISO",
        "actionType",
        "actionUserId",
        "auditResource",
        "details_id",
        "details_status",
        "details_username",
        "eventType",
        "ipAddress",
    ];

    /// Field values in [`Self::COLUMNS`] order; missing values are empty.
    pub fn row(&self) -> [&str; 10] {
        fn opt(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("")
        }
        [
            self.event_date.as_str(),
            self.event_date_iso.as_str(),
            opt(&self.action_type),
            opt(&self.action_user_id),
            opt(&self.audit_resource),
            opt(&self.details_id),
            opt(&self.details_status),
            opt(&self.details_username),
            opt(&self.event_type),
            opt(&self.ip_address),
        ]
    }
}

/// Render a JSON scalar as export text. `null` is absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Flatten a source record into the export schema.
///
/// An `eventDate` that cannot be parsed is carried through verbatim in both
/// date columns and leaves `timestamp` unset.
pub fn flatten_event(raw: &RawAuditEvent) -> AuditEvent {
    let source_date = value_text(&raw.event_date).unwrap_or_default();
    let timestamp = timestamp::parse_event_timestamp(&source_date);

    let (event_date, event_date_iso) = match timestamp {
        Some(ts) => (timestamp::format_display(ts), timestamp::format_iso(ts)),
        None => {
            if !source_date.is_empty() {
                tracing::debug!("Unparseable eventDate '{}'", source_date);
            }
            (source_date.clone(), source_date)
        }
    };

    let details = raw.data.as_object();
    let detail = |key: &str| details.and_then(|d| d.get(key)).and_then(value_text);

    AuditEvent {
        event_date,
        event_date_iso,
        action_type: value_text(&raw.action_type),
        action_user_id: value_text(&raw.action_user_id),
        audit_resource: value_text(&raw.audit_resource),
        details_id: detail("id"),
        details_status: detail("status"),
        details_username: detail("username"),
        event_type: value_text(&raw.event_type),
        ip_address: value_text(&raw.ip_address),
        timestamp,
    }
}

/// Inclusive date window. A missing bound is open on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(Error::Config(format!(
                    "start {} is after end {}",
                    s.to_rfc3339(),
                    e.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Whole calendar days in UTC: start at midnight, end at the last
    /// microsecond of the day.
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        let start = start.map(|d| d.and_time(NaiveTime::MIN).and_utc());
        let end = end
            .map(|d| {
                NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
                    .map(|t| d.and_time(t).and_utc())
                    .ok_or_else(|| Error::Config("invalid end of day".into()))
            })
            .transpose()?;
        Self::new(start, end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// An event without a timestamp only matches an unbounded range.
    pub fn contains(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(ts) = timestamp else {
            return false;
        };
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts <= e)
    }
}

/// Flatten `records` and keep those inside `range`.
pub fn normalize<'a, I>(records: I, range: &DateRange) -> Vec<AuditEvent>
where
    I: IntoIterator<Item = &'a RawAuditEvent>,
{
    records
        .into_iter()
        .map(flatten_event)
        .filter(|event| range.contains(event.timestamp))
        .collect()
}
