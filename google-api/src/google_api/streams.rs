//! YouTube Live Streams API types.
//!
//! A stream is the ingestion side of a live event: where the encoder pushes media and with
//! which stream name (the "stream key"). Only the CDN part is modelled here.

use crate::google_api::types::PageInfo;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Response structure for the `liveStreams.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveStreams/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct LiveStreamListResponse {
    #[serde(default)]
    pub items: Option<VecDeque<LiveStream>>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: Option<PageInfo>,
}

/// A `liveStream` resource.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveStreams#resource>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStream {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<LiveStreamCdn>,
}

impl LiveStream {
    /// A stream whose ingestion details carry `stream_name`.
    pub fn with_stream_name(id: impl Into<String>, stream_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cdn: Some(LiveStreamCdn {
                ingestion_info: Some(IngestionInfo {
                    stream_name: Some(stream_name.into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    /// The ingestion stream name, if YouTube reported one.
    pub fn stream_name(&self) -> Option<&str> {
        self.cdn
            .as_ref()?
            .ingestion_info
            .as_ref()?
            .stream_name
            .as_deref()
    }
}

/// See: <https://developers.google.com/youtube/v3/live/docs/liveStreams#cdn>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamCdn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_info: Option<IngestionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<String>,
}

/// See: <https://developers.google.com/youtube/v3/live/docs/liveStreams#cdn.ingestionInfo>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionInfo {
    /// The stream name (stream key) the encoder must use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_ingestion_address: Option<String>,
}
