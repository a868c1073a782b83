//! A scriptable in-memory [`IdentityProvider`].
//!
//! Every capability succeeds by default. Individual capabilities can be made to fail, and
//! each call is counted so that tests can assert how often the provider was reached.

use crate::google_api::{CalendarEntry, LiveBroadcast, LiveStream};
use crate::provider::{IdentityProvider, RawBroadcastList, RawEntryList, RawIngestionList};
use crate::state::Profile;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The capabilities of [`IdentityProvider`], for scripting failures and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    LoadLibrary,
    InitializeClient,
    IsSignedIn,
    SignIn,
    SignOut,
    GetCurrentProfile,
    PromptAccountSelection,
    QueryCalendarEntries,
    QueryBroadcasts,
    QueryIngestionInfo,
    UpdateCalendarEntry,
}

/// A calendar update as received by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarUpdate {
    pub event_id: String,
    pub calendar_id: String,
    pub location: String,
    pub description: String,
}

#[derive(Debug, Default)]
struct Script {
    failures: HashMap<Capability, String>,
    calls: HashMap<Capability, usize>,
    signed_in: bool,
    profile: Profile,
    broadcasts: RawBroadcastList,
    ingestion: RawIngestionList,
    calendar: RawEntryList,
    calendar_windows: Vec<(Option<i32>, Option<i32>)>,
    updates: Vec<CalendarUpdate>,
    application_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<Script>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every later call to `capability` fail with `message`.
    pub fn fail(&self, capability: Capability, message: impl Into<String>) -> &Self {
        self.script().failures.insert(capability, message.into());
        self
    }

    /// Makes `capability` succeed again.
    pub fn succeed(&self, capability: Capability) -> &Self {
        self.script().failures.remove(&capability);
        self
    }

    /// Whether an earlier authorization is still usable.
    pub fn set_signed_in(&self, signed_in: bool) -> &Self {
        self.script().signed_in = signed_in;
        self
    }

    pub fn set_profile(&self, email: impl Into<String>) -> &Self {
        self.script().profile = Profile::new(email);
        self
    }

    pub fn set_broadcasts(&self, broadcasts: RawBroadcastList) -> &Self {
        self.script().broadcasts = broadcasts;
        self
    }

    pub fn set_ingestion(&self, streams: RawIngestionList) -> &Self {
        self.script().ingestion = streams;
        self
    }

    pub fn set_calendar(&self, entries: RawEntryList) -> &Self {
        self.script().calendar = entries;
        self
    }

    /// How often `capability` has been called, including failed calls.
    pub fn calls(&self, capability: Capability) -> usize {
        self.script().calls.get(&capability).copied().unwrap_or(0)
    }

    pub fn calendar_windows(&self) -> Vec<(Option<i32>, Option<i32>)> {
        self.script().calendar_windows.clone()
    }

    pub fn updates(&self) -> Vec<CalendarUpdate> {
        self.script().updates.clone()
    }

    pub fn application_ids(&self) -> Vec<String> {
        self.script().application_ids.clone()
    }

    /// Records a call and yields once, so that concurrent callers interleave.
    async fn enter(&self, capability: Capability) -> eyre::Result<()> {
        let failure = {
            let mut script = self.script();
            *script.calls.entry(capability).or_default() += 1;
            script.failures.get(&capability).cloned()
        };
        tokio::task::yield_now().await;
        match failure {
            Some(message) => Err(eyre::eyre!(message)),
            None => Ok(()),
        }
    }
}

impl IdentityProvider for MockProvider {
    async fn load_library(&self) -> eyre::Result<()> {
        self.enter(Capability::LoadLibrary).await
    }

    async fn initialize_client(&self, application_id: &str) -> eyre::Result<()> {
        self.script()
            .application_ids
            .push(application_id.to_string());
        self.enter(Capability::InitializeClient).await
    }

    async fn is_signed_in(&self) -> eyre::Result<bool> {
        self.enter(Capability::IsSignedIn).await?;
        Ok(self.script().signed_in)
    }

    async fn sign_in(&self) -> eyre::Result<()> {
        self.enter(Capability::SignIn).await?;
        self.script().signed_in = true;
        Ok(())
    }

    async fn sign_out(&self) -> eyre::Result<()> {
        self.enter(Capability::SignOut).await?;
        self.script().signed_in = false;
        Ok(())
    }

    async fn get_current_profile(&self) -> eyre::Result<Profile> {
        self.enter(Capability::GetCurrentProfile).await?;
        Ok(self.script().profile.clone())
    }

    async fn prompt_account_selection(&self) -> eyre::Result<()> {
        self.enter(Capability::PromptAccountSelection).await
    }

    async fn query_calendar_entries(
        &self,
        start_days: Option<i32>,
        end_days: Option<i32>,
    ) -> eyre::Result<RawEntryList> {
        self.script().calendar_windows.push((start_days, end_days));
        self.enter(Capability::QueryCalendarEntries).await?;
        Ok(self.script().calendar.clone())
    }

    async fn query_broadcasts(&self) -> eyre::Result<RawBroadcastList> {
        self.enter(Capability::QueryBroadcasts).await?;
        Ok(self.script().broadcasts.clone())
    }

    async fn query_ingestion_info(&self, _bound_stream_id: &str) -> eyre::Result<RawIngestionList> {
        self.enter(Capability::QueryIngestionInfo).await?;
        Ok(self.script().ingestion.clone())
    }

    async fn update_calendar_entry(
        &self,
        event_id: &str,
        calendar_id: &str,
        location: &str,
        description: &str,
    ) -> eyre::Result<()> {
        self.enter(Capability::UpdateCalendarEntry).await?;
        self.script().updates.push(CalendarUpdate {
            event_id: event_id.to_string(),
            calendar_id: calendar_id.to_string(),
            location: location.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }
}

/// A broadcast with the given bound stream (empty for none) and the default title/status.
pub fn broadcast(id: &str, bound_stream_id: &str) -> LiveBroadcast {
    LiveBroadcast::bound(id, bound_stream_id, format!("Broadcast {id}"), "ready")
}

pub fn stream(stream_name: &str) -> LiveStream {
    LiveStream::with_stream_name("stream", stream_name)
}

pub fn calendar_entry(id: &str, summary: &str) -> CalendarEntry {
    CalendarEntry {
        id: id.to_string(),
        summary: Some(summary.to_string()),
        ..CalendarEntry::default()
    }
}
