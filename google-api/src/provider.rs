//! The capability contract of the external identity provider.
//!
//! Everything the session gate and the broadcast catalog need from the outside world goes
//! through [`IdentityProvider`]. Each capability is an independent remote call that may fail
//! on its own; none of them retry.

use crate::google_api::{CalendarEntry, LiveBroadcast, LiveStream};
use crate::state::Profile;
use std::future::Future;

/// The items of a (possibly multi-page) list query, in the order the service returned them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawList<T> {
    /// `None` when the response did not carry an item list at all.
    pub items: Option<Vec<T>>,
}

impl<T> RawList<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Some(items.into_iter().collect()),
        }
    }

    /// A response whose item list is structurally absent.
    pub fn missing() -> Self {
        Self { items: None }
    }
}

impl<T> Default for RawList<T> {
    fn default() -> Self {
        Self {
            items: Some(Vec::new()),
        }
    }
}

pub type RawBroadcastList = RawList<LiveBroadcast>;
pub type RawIngestionList = RawList<LiveStream>;
pub type RawEntryList = RawList<CalendarEntry>;

/// An account-backed identity provider and its companion services (calendar and live
/// broadcasting).
pub trait IdentityProvider: Send + Sync {
    /// Makes the provider's client library available.
    fn load_library(&self) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Initializes the client with the application's credentials.
    fn initialize_client(
        &self,
        application_id: &str,
    ) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Whether a previously granted authorization is still usable.
    fn is_signed_in(&self) -> impl Future<Output = eyre::Result<bool>> + Send;

    /// Prompts the user to sign in interactively.
    fn sign_in(&self) -> impl Future<Output = eyre::Result<()>> + Send;

    fn sign_out(&self) -> impl Future<Output = eyre::Result<()>> + Send;

    fn get_current_profile(&self) -> impl Future<Output = eyre::Result<Profile>> + Send;

    /// Makes the next interactive sign-in show an account chooser.
    fn prompt_account_selection(&self) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Lists calendar entries between `start_days` and `end_days` relative to now.
    ///
    /// Negative offsets lie in the past. A missing bound is left to the provider's default.
    fn query_calendar_entries(
        &self,
        start_days: Option<i32>,
        end_days: Option<i32>,
    ) -> impl Future<Output = eyre::Result<RawEntryList>> + Send;

    /// Lists the signed-in user's live broadcasts.
    fn query_broadcasts(&self) -> impl Future<Output = eyre::Result<RawBroadcastList>> + Send;

    /// Looks up the ingestion details of the stream bound to a broadcast.
    fn query_ingestion_info(
        &self,
        bound_stream_id: &str,
    ) -> impl Future<Output = eyre::Result<RawIngestionList>> + Send;

    fn update_calendar_entry(
        &self,
        event_id: &str,
        calendar_id: &str,
        location: &str,
        description: &str,
    ) -> impl Future<Output = eyre::Result<()>> + Send;
}
