//! YouTube Live Broadcasts API types.
//!
//! A broadcast is the viewer-facing side of a live event (title, schedule, lifecycle). It is
//! bound to a [`LiveStream`](super::LiveStream), which carries the technical ingestion
//! details. Several broadcasts may be bound to the same stream.
//!
//! Every field here is optional on the wire.

use crate::google_api::types::PageInfo;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Response structure for the `liveBroadcasts.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct LiveBroadcastListResponse {
    #[serde(default)]
    pub items: Option<VecDeque<LiveBroadcast>>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: Option<PageInfo>,
    #[serde(rename = "nextPageToken", default)]
    pub next_page_token: Option<String>,
}

/// A `liveBroadcast` resource.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts#resource>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcast {
    /// The ID that YouTube assigns to uniquely identify the broadcast.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<LiveBroadcastSnippet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_details: Option<LiveBroadcastContentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LiveBroadcastStatus>,
}

impl LiveBroadcast {
    /// Convenience constructor for a broadcast bound to `bound_stream_id`.
    pub fn bound(
        id: impl Into<String>,
        bound_stream_id: impl Into<String>,
        title: impl Into<String>,
        life_cycle_status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            snippet: Some(LiveBroadcastSnippet {
                title: Some(title.into()),
                ..Default::default()
            }),
            content_details: Some(LiveBroadcastContentDetails {
                bound_stream_id: Some(bound_stream_id.into()),
            }),
            status: Some(LiveBroadcastStatus {
                life_cycle_status: Some(life_cycle_status.into()),
                privacy_status: None,
            }),
        }
    }

    /// The ID of the stream this broadcast is bound to, or `""` if it isn't bound.
    pub fn bound_stream_id(&self) -> &str {
        self.content_details
            .as_ref()
            .and_then(|details| details.bound_stream_id.as_deref())
            .unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.snippet
            .as_ref()
            .and_then(|snippet| snippet.title.as_deref())
            .unwrap_or_default()
    }

    /// The raw `status.lifeCycleStatus` value, e.g. `ready`, `testing`, `live` or `complete`.
    pub fn life_cycle_status(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|status| status.life_cycle_status.as_deref())
            .unwrap_or_default()
    }
}

/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts#snippet>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastSnippet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<Timestamp>,
}

/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts#contentDetails>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastContentDetails {
    /// The ID of the live stream bound to the broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_stream_id: Option<String>,
}

/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts#status>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastStatus {
    /// Includes transitional values such as `liveStarting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life_cycle_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_status: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use super::*;

    #[test]
    fn deserialize_partial_broadcasts() {
        let page: LiveBroadcastListResponse = serde_json::from_value(serde_json::json!({
            "kind": "youtube#liveBroadcastListResponse",
            "items": [
                {
                    "id": "b1",
                    "snippet": { "title": "Weekly sync", "publishedAt": "2024-03-01T10:00:00Z" },
                    "contentDetails": { "boundStreamId": "s1", "enableDvr": true },
                    "status": { "lifeCycleStatus": "liveStarting", "privacyStatus": "unlisted" }
                },
                { "id": "b2" }
            ],
            "pageInfo": { "totalResults": 2, "resultsPerPage": 50 }
        }))
        .unwrap();

        let items = page.items.unwrap();
        assert_eq!(items[0].bound_stream_id(), "s1");
        assert_eq!(items[0].title(), "Weekly sync");
        assert_eq!(items[0].life_cycle_status(), "liveStarting");
        assert_eq!(items[1].bound_stream_id(), "");
        assert_eq!(items[1].title(), "");
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn missing_items_stays_missing() {
        let json = serde_json::json!({ "kind": "youtube#liveBroadcastListResponse" });
        let page: LiveBroadcastListResponse = serde_json::from_value(json).unwrap();
        assert!(page.items.is_none());
    }
}
