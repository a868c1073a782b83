//! [`IdentityProvider`] backed by Google's OAuth, Calendar and YouTube Data APIs.

use crate::config::Config;
use crate::provider::{IdentityProvider, RawBroadcastList, RawEntryList, RawIngestionList, RawList};
use crate::state::Profile;
use eyre::Context;
use jiff::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_stream::StreamExt;
use tracing::instrument;

pub mod broadcasts;
pub mod calendar;
pub mod client;
pub mod discovery;
pub mod oauth;
pub mod streams;
pub mod token;
pub mod types;

pub use broadcasts::LiveBroadcast;
pub use calendar::{CalendarEntry, EventDateTime};
pub use client::{ApiClient, UserInfo};
pub use discovery::ProviderEndpoints;
pub use oauth::OAuthManager;
pub use streams::LiveStream;
pub use token::{TimeBoundAccessToken, TokenStore};

use calendar::{CalendarEventPatch, offset_days};
use types::MissingItems;

/// The calendar all entries are read from.
const PRIMARY_CALENDAR: &str = "primary";

/// The HTTP client and the provider's endpoints, available once the library is loaded.
#[derive(Debug)]
struct Library {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
}

/// Google as an identity provider.
///
/// Loading the library resolves the OAuth endpoints through OpenID discovery. Initializing
/// the client picks up the token persisted by an earlier run, if any.
#[derive(Debug)]
pub struct GoogleApi {
    config: Config,
    tokens: TokenStore,
    library: OnceLock<Library>,
    client: OnceLock<ApiClient>,
    select_account: AtomicBool,
}

impl GoogleApi {
    pub fn new(config: Config) -> Self {
        Self {
            tokens: TokenStore::new(config.token_file.clone()),
            config,
            library: OnceLock::new(),
            client: OnceLock::new(),
            select_account: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn library(&self) -> eyre::Result<&Library> {
        self.library
            .get()
            .ok_or_else(|| eyre::eyre!("Google API library has not been loaded"))
    }

    fn client(&self) -> eyre::Result<&ApiClient> {
        self.client
            .get()
            .ok_or_else(|| eyre::eyre!("Google API client has not been initialized"))
    }
}

impl IdentityProvider for GoogleApi {
    #[instrument(skip(self), err)]
    async fn load_library(&self) -> eyre::Result<()> {
        if self.library.get().is_some() {
            return Ok(());
        }

        let http = reqwest::Client::builder()
            // oauth2 needs a client that does not follow redirects
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.config.request_timeout()?)
            .build()
            .context("build HTTP client")?;
        let endpoints = discovery::discover(&http, &self.config.accounts_base_url)
            .await
            .context("discover Google OAuth endpoints")?;

        // a racing load resolved the same endpoints
        let _ = self.library.set(Library { http, endpoints });
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn initialize_client(&self, application_id: &str) -> eyre::Result<()> {
        if self.client.get().is_some() {
            return Ok(());
        }
        if application_id.is_empty() {
            eyre::bail!("no OAuth client id configured");
        }

        let library = self.library()?;
        let oauth = OAuthManager::new(
            application_id,
            self.config.client_secret.clone(),
            library.endpoints.clone(),
            library.http.clone(),
        );
        let client = ApiClient::new(
            Arc::new(oauth),
            library.http.clone(),
            &self.config.api_base_url,
        );

        if let Some(token) = self.tokens.load().await.context("load stored token")? {
            tracing::debug!("found stored token");
            let token = TimeBoundAccessToken::expired(token);
            client.set_token(Some(token)).await;
        }

        let _ = self.client.set(client);
        Ok(())
    }

    #[instrument(skip(self), ret, err)]
    async fn is_signed_in(&self) -> eyre::Result<bool> {
        let client = self.client()?;
        if !client.has_usable_token().await? {
            return Ok(false);
        }
        // a refresh may have replaced the stored access token
        if let Some(token) = client.token().await {
            self.tokens.save(&token).await.context("persist token")?;
        }
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn sign_in(&self) -> eyre::Result<()> {
        let client = self.client()?;
        let select_account = self.select_account.swap(false, Ordering::AcqRel);
        let token = client
            .oauth()
            .authenticate(select_account)
            .await
            .context("authorize user with Google")?;
        self.tokens.save(&token).await.context("persist token")?;
        client.set_token(Some(TimeBoundAccessToken::new(token))).await;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn sign_out(&self) -> eyre::Result<()> {
        let client = self.client()?;
        if let Some(token) = client.take_token().await {
            if let Err(e) = client.oauth().revoke(&token).await {
                tracing::warn!(error = %e, "failed to revoke token, forgetting it anyway");
            }
        }
        self.tokens.clear().await.context("remove stored token")
    }

    #[instrument(skip(self), err)]
    async fn get_current_profile(&self) -> eyre::Result<Profile> {
        let info = self.client()?.get_user_info().await?;
        let email = info
            .email
            .ok_or_else(|| eyre::eyre!("userinfo response has no email"))?;
        Ok(Profile::new(email))
    }

    async fn prompt_account_selection(&self) -> eyre::Result<()> {
        self.library()?;
        self.select_account.store(true, Ordering::Release);
        tracing::debug!("next sign-in will ask which account to use");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn query_calendar_entries(
        &self,
        start_days: Option<i32>,
        end_days: Option<i32>,
    ) -> eyre::Result<RawEntryList> {
        let client = self.client()?;
        let now = Timestamp::now();
        let time_min = start_days.map(|days| offset_days(now, days)).transpose()?;
        let time_max = end_days.map(|days| offset_days(now, days)).transpose()?;

        let entries = client
            .list_calendar_events(PRIMARY_CALENDAR, time_min, time_max)
            .collect::<eyre::Result<Vec<_>>>()
            .await;
        collect_items(entries)
    }

    #[instrument(skip(self), err)]
    async fn query_broadcasts(&self) -> eyre::Result<RawBroadcastList> {
        let broadcasts = self
            .client()?
            .list_my_live_broadcasts()
            .collect::<eyre::Result<Vec<_>>>()
            .await;
        collect_items(broadcasts)
    }

    #[instrument(skip(self), err)]
    async fn query_ingestion_info(&self, bound_stream_id: &str) -> eyre::Result<RawIngestionList> {
        let streams = self.client()?.get_live_stream_cdn(bound_stream_id).await?;
        Ok(RawList {
            items: streams.items.map(Vec::from),
        })
    }

    #[instrument(skip(self, description), err)]
    async fn update_calendar_entry(
        &self,
        event_id: &str,
        calendar_id: &str,
        location: &str,
        description: &str,
    ) -> eyre::Result<()> {
        self.client()?
            .patch_calendar_event(
                calendar_id,
                event_id,
                &CalendarEventPatch {
                    location,
                    description,
                },
            )
            .await
    }
}

/// Turns the outcome of draining a paged listing into a [`RawList`].
///
/// A page without an item list makes the whole listing structurally absent.
fn collect_items<T>(items: eyre::Result<Vec<T>>) -> eyre::Result<RawList<T>> {
    match items {
        Ok(items) => Ok(RawList::new(items)),
        Err(e) if e.downcast_ref::<MissingItems>().is_some() => {
            tracing::debug!(error = %e, "listing came back without items");
            Ok(RawList::missing())
        }
        Err(e) => Err(e),
    }
}
