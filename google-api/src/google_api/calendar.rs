//! Google Calendar events API types.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Response structure for the `events.list` API call.
///
/// See: <https://developers.google.com/calendar/api/v3/reference/events/list>
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventListResponse {
    #[serde(default)]
    pub items: Option<VecDeque<CalendarEntry>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// An `event` resource, as returned by the service.
///
/// The commonly used fields are typed; everything else is kept verbatim in `extra` so that
/// entries can be handed to callers unmodified.
///
/// See: <https://developers.google.com/calendar/api/v3/reference/events#resource>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The start or end of an event.
///
/// All-day events only carry a `date`; timed events carry a `date_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<jiff::civil::Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Request body for `events.patch` that only touches location and description.
///
/// See: <https://developers.google.com/calendar/api/v3/reference/events/patch>
#[derive(Debug, Serialize)]
pub struct CalendarEventPatch<'a> {
    pub location: &'a str,
    pub description: &'a str,
}

/// The instant `days` whole days away from `now` (negative is in the past).
pub(crate) fn offset_days(now: Timestamp, days: i32) -> eyre::Result<Timestamp> {
    now.checked_add(SignedDuration::from_hours(i64::from(days) * 24))
        .map_err(|e| eyre::eyre!("calendar window offset of {days} days is out of range: {e}"))
}
