//! Broadcast, stream key and calendar queries on behalf of the current session.
//!
//! The catalog never changes session state. It only reads it to decide whether the provider
//! is ready to be queried, and it keeps nothing between calls.

use crate::error::{CatalogError, SessionError};
use crate::google_api::{CalendarEntry, LiveBroadcast};
use crate::provider::IdentityProvider;
use crate::session::SessionGate;
use crate::share_info::{DescriptionBuilder, ShareInfoText};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// A live broadcast that has a stream bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRecord {
    /// Never empty.
    pub bound_stream_id: String,
    pub id: String,
    /// The broadcast's life cycle status, such as `ready` or `live`.
    pub status: String,
    pub title: String,
}

impl From<&LiveBroadcast> for BroadcastRecord {
    fn from(broadcast: &LiveBroadcast) -> Self {
        Self {
            bound_stream_id: broadcast.bound_stream_id().to_string(),
            id: broadcast.id.clone(),
            status: broadcast.life_cycle_status().to_string(),
            title: broadcast.title().to_string(),
        }
    }
}

/// The stream key for a broadcast's bound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamKeySelection {
    /// Empty when the service did not report an ingestion stream name.
    pub stream_key: String,
    pub selected_bound_stream_id: String,
}

/// Keeps the first broadcast for each bound stream, in the order given.
///
/// Broadcasts without a bound stream cannot be streamed to and are dropped.
pub fn dedup_broadcasts<'a>(
    broadcasts: impl IntoIterator<Item = &'a LiveBroadcast>,
) -> Vec<BroadcastRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for broadcast in broadcasts {
        let bound_stream_id = broadcast.bound_stream_id();
        if bound_stream_id.is_empty() {
            tracing::trace!(id = %broadcast.id, "skipping broadcast without bound stream");
            continue;
        }
        if !seen.insert(bound_stream_id) {
            tracing::trace!(id = %broadcast.id, bound_stream_id, "skipping duplicate broadcast");
            continue;
        }
        records.push(BroadcastRecord::from(broadcast));
    }
    records
}

/// Queries the identity provider's companion services once the session is ready.
pub struct BroadcastCatalog<P> {
    gate: SessionGate<P>,
    description: Arc<dyn DescriptionBuilder>,
    dial_in_numbers_url: Option<String>,
}

impl<P> Clone for BroadcastCatalog<P> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            description: Arc::clone(&self.description),
            dial_in_numbers_url: self.dial_in_numbers_url.clone(),
        }
    }
}

impl<P> std::fmt::Debug for BroadcastCatalog<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastCatalog")
            .field("gate", &self.gate)
            .field("dial_in_numbers_url", &self.dial_in_numbers_url)
            .finish_non_exhaustive()
    }
}

impl<P> BroadcastCatalog<P>
where
    P: IdentityProvider + 'static,
{
    pub fn new(gate: SessionGate<P>) -> Self {
        Self {
            gate,
            description: Arc::new(ShareInfoText),
            dial_in_numbers_url: None,
        }
    }

    pub fn with_description_builder(mut self, builder: impl DescriptionBuilder + 'static) -> Self {
        self.description = Arc::new(builder);
        self
    }

    /// Event descriptions mention joining by phone only if a dial-in numbers page is set.
    pub fn with_dial_in_numbers_url(mut self, url: Option<String>) -> Self {
        self.dial_in_numbers_url = url;
        self
    }

    pub fn gate(&self) -> &SessionGate<P> {
        &self.gate
    }

    /// Fails unless bootstrap has succeeded and the provider client is initialized.
    async fn ensure_ready(&self) -> Result<(), CatalogError> {
        if let Err(e) = self.gate.bootstrap().await {
            return Err(CatalogError::NotReady {
                state: self.gate.state(),
                source: Some(e),
            });
        }
        let state = self.gate.state();
        if !state.is_client_ready() {
            tracing::debug!(%state, "provider queried before its client was initialized");
            return Err(CatalogError::NotReady {
                state,
                source: None,
            });
        }
        Ok(())
    }

    /// Lists the signed-in user's broadcasts, one per bound stream.
    #[instrument(skip(self))]
    pub async fn list_available_broadcasts(&self) -> Result<Vec<BroadcastRecord>, CatalogError> {
        self.ensure_ready().await?;
        let raw = self
            .gate
            .provider()
            .query_broadcasts()
            .await
            .map_err(CatalogError::remote)?;
        let items = raw
            .items
            .ok_or(CatalogError::MalformedResponse("broadcast list has no items"))?;

        let records = dedup_broadcasts(&items);
        tracing::debug!(
            received = items.len(),
            kept = records.len(),
            "listed available broadcasts"
        );
        Ok(records)
    }

    /// Looks up the stream key of the stream bound to a broadcast.
    #[instrument(skip(self))]
    pub async fn resolve_stream_key(
        &self,
        bound_stream_id: &str,
    ) -> Result<StreamKeySelection, CatalogError> {
        if bound_stream_id.is_empty() {
            return Err(CatalogError::EmptyBoundStreamId);
        }
        self.ensure_ready().await?;

        let raw = self
            .gate
            .provider()
            .query_ingestion_info(bound_stream_id)
            .await
            .map_err(CatalogError::remote)?;
        let stream_key = raw
            .items
            .as_deref()
            .and_then(|streams| streams.first())
            .and_then(|stream| stream.stream_name())
            .unwrap_or_default()
            .to_string();
        if stream_key.is_empty() {
            tracing::debug!(bound_stream_id, "no ingestion stream name reported");
        }

        Ok(StreamKeySelection {
            stream_key,
            selected_bound_stream_id: bound_stream_id.to_string(),
        })
    }

    /// Has the next sign-in offer a choice of account.
    pub async fn prompt_account_selection(&self) -> Result<(), CatalogError> {
        self.gate
            .force_account_selection()
            .await
            .map_err(|e| match e {
                SessionError::ProviderUnavailable(_) => CatalogError::NotReady {
                    state: self.gate.state(),
                    source: Some(e),
                },
                other => CatalogError::RemoteQuery(Arc::new(other)),
            })
    }

    /// Fetches calendar entries between `start_days` and `end_days` relative to now, as the
    /// service returned them.
    #[instrument(skip(self))]
    pub async fn fetch_calendar_entries(
        &self,
        start_days: Option<i32>,
        end_days: Option<i32>,
    ) -> Result<Vec<CalendarEntry>, CatalogError> {
        self.ensure_ready().await?;
        let raw = self
            .gate
            .provider()
            .query_calendar_entries(start_days, end_days)
            .await
            .map_err(CatalogError::remote)?;
        raw.items
            .ok_or(CatalogError::MalformedResponse("calendar entry list has no items"))
    }

    /// Sets the location and description of a calendar event.
    #[instrument(skip(self, description))]
    pub async fn update_calendar_entry(
        &self,
        event_id: &str,
        calendar_id: &str,
        location: &str,
        description: &str,
    ) -> Result<(), CatalogError> {
        self.ensure_ready().await?;
        self.gate
            .provider()
            .update_calendar_entry(event_id, calendar_id, location, description)
            .await
            .map_err(CatalogError::remote)
    }

    /// Points a calendar event at the meeting at `location`, with the standard invitation as
    /// its description.
    pub async fn update_calendar_event(
        &self,
        event_id: &str,
        calendar_id: &str,
        location: &str,
    ) -> Result<(), CatalogError> {
        let description = self
            .description
            .build(location, self.dial_in_numbers_url.is_some());
        self.update_calendar_entry(event_id, calendar_id, location, &description)
            .await
    }
}
