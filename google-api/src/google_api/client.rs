//! Authenticated access to the Google REST APIs (YouTube Data v3, Calendar v3, userinfo).

use crate::google_api::calendar::{CalendarEntry, CalendarEventListResponse, CalendarEventPatch};
use crate::google_api::oauth::OAuthManager;
use crate::google_api::streams::LiveStreamListResponse;
use crate::google_api::token::TimeBoundAccessToken;
use crate::google_api::types::{MissingItems, PagedStream};
use crate::google_api::{LiveBroadcast, broadcasts::LiveBroadcastListResponse};
use eyre::Context;
use http::Method;
use jiff::Timestamp;
use oauth2::basic::BasicTokenResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::Stream;
use tracing::instrument;

/// The `userinfo` endpoint's response.
///
/// See: <https://developers.google.com/identity/openid-connect/openid-connect#obtaininguserprofileinformation>
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// Client for the Google REST APIs on behalf of one signed-in user.
///
/// Access tokens are refreshed transparently before a request once they are about to
/// expire. A client without a token fails every request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    token: Arc<Mutex<Option<TimeBoundAccessToken>>>,
    oauth: Arc<OAuthManager>,
    http: reqwest::Client,
    /// Normally `https://www.googleapis.com`.
    api_base_url: Arc<str>,
}

impl ApiClient {
    pub fn new(oauth: Arc<OAuthManager>, http: reqwest::Client, api_base_url: &str) -> Self {
        Self {
            token: Arc::new(Mutex::new(None)),
            oauth,
            http,
            api_base_url: Arc::from(api_base_url.trim_end_matches('/')),
        }
    }

    pub fn oauth(&self) -> &OAuthManager {
        &self.oauth
    }

    /// Replaces the token used for requests; `None` signs the client out.
    pub async fn set_token(&self, token: Option<TimeBoundAccessToken>) {
        *self.token.lock().await = token;
    }

    /// Takes the token out of the client, leaving it signed out.
    pub async fn take_token(&self) -> Option<BasicTokenResponse> {
        self.token.lock().await.take().map(|t| t.raw_token().clone())
    }

    pub async fn token(&self) -> Option<BasicTokenResponse> {
        self.token
            .lock()
            .await
            .as_ref()
            .map(|t| t.raw_token().clone())
    }

    /// Whether the client holds a token that is (or could be refreshed to be) valid.
    ///
    /// A token the provider refuses to refresh is dropped.
    #[instrument(skip(self), ret, err)]
    pub async fn has_usable_token(&self) -> eyre::Result<bool> {
        let mut token = self.token.lock().await;
        let Some(current) = token.as_mut() else {
            return Ok(false);
        };
        if !current.is_expired() {
            return Ok(true);
        }
        if current.refresh(&self.oauth).await? {
            return Ok(true);
        }
        tracing::info!("stored authorization is no longer accepted");
        *token = None;
        Ok(false)
    }

    /// Gets a fresh access token, refreshing the current one if needed.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    async fn fresh_access_token(&self) -> eyre::Result<String> {
        let mut token = self.token.lock().await;
        let Some(current) = token.as_mut() else {
            eyre::bail!("not signed in");
        };

        if current.is_expired() {
            tracing::debug!("access token expired, attempting refresh");
            if !current.refresh(&self.oauth).await? {
                tracing::error!("access token refresh failed, client is unusable");
                eyre::bail!("unable to refresh expired access token");
            }
        }

        Ok(current.access_token().to_string())
    }

    /// Makes an authenticated request and fails on any non-success status.
    ///
    /// The error carries the response body, which for Google APIs explains what went wrong
    /// (quota, permissions, bad parameters).
    #[instrument(skip(self, json_body), level = tracing::Level::TRACE)]
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        url: &str,
        query_params: Option<&[(&str, &str)]>,
        json_body: Option<&impl Serialize>,
    ) -> eyre::Result<reqwest::Response> {
        let access_token = self.fresh_access_token().await?;

        let mut request = self.http.request(method.clone(), url).bearer_auth(access_token);
        if let Some(params) = query_params {
            request = request.query(params);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("send {method} request to {url}"))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            eyre::bail!("{method} {url} failed with status {status_code}: {error_text}");
        }

        Ok(response)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base_url)
    }

    /// Fetches the signed-in user's OpenID profile.
    #[instrument(skip(self), err)]
    pub async fn get_user_info(&self) -> eyre::Result<UserInfo> {
        let url = self.oauth.endpoints().userinfo_endpoint.clone();
        let response = self
            .make_authenticated_request(Method::GET, &url, None, None::<&()>)
            .await?;
        response.json().await.context("parse userinfo response as JSON")
    }

    /// Returns every live broadcast owned by the signed-in user, across all pages.
    ///
    /// A page without an `items` array ends the stream with a [`MissingItems`] error.
    ///
    /// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts/list>
    #[instrument(skip(self))]
    pub fn list_my_live_broadcasts(
        &self,
    ) -> impl Stream<Item = eyre::Result<LiveBroadcast>> + use<'_> {
        PagedStream::new(|page_token| async {
            let response = self.list_live_broadcasts_page(50, page_token).await?;
            let items = response.items.ok_or(MissingItems {
                resource: "liveBroadcasts",
            })?;
            Ok((items, response.next_page_token))
        })
    }

    async fn list_live_broadcasts_page(
        &self,
        max_results: u32,
        page_token: Option<String>,
    ) -> eyre::Result<LiveBroadcastListResponse> {
        let url = self.url("/youtube/v3/liveBroadcasts");
        let max_results = max_results.to_string();
        let mut query_params = vec![
            ("part", "id,snippet,contentDetails,status"),
            ("mine", "true"),
            ("broadcastType", "all"),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(ref token) = page_token {
            query_params.push(("pageToken", token.as_str()));
        }

        let response = self
            .make_authenticated_request(Method::GET, &url, Some(&query_params), None::<&()>)
            .await?;
        let page: LiveBroadcastListResponse = response
            .json()
            .await
            .context("parse liveBroadcasts response as JSON")?;

        tracing::debug!(
            returned_items = page.items.as_ref().map(|items| items.len()),
            has_next_page = page.next_page_token.is_some(),
            "fetched live broadcasts"
        );
        Ok(page)
    }

    /// Looks up a live stream's CDN (ingestion) settings by its ID.
    ///
    /// See: <https://developers.google.com/youtube/v3/live/docs/liveStreams/list>
    #[instrument(skip(self), err)]
    pub async fn get_live_stream_cdn(
        &self,
        stream_id: &str,
    ) -> eyre::Result<LiveStreamListResponse> {
        let url = self.url("/youtube/v3/liveStreams");
        let query_params = [("part", "id,cdn"), ("id", stream_id)];

        let response = self
            .make_authenticated_request(Method::GET, &url, Some(&query_params), None::<&()>)
            .await?;
        let streams: LiveStreamListResponse = response
            .json()
            .await
            .context("parse liveStreams response as JSON")?;

        tracing::debug!(
            stream_id,
            returned_items = streams.items.as_ref().map(|items| items.len()),
            "fetched live stream"
        );
        Ok(streams)
    }

    /// Returns the single events of `calendar_id` between `time_min` and `time_max`, ordered
    /// by start time, across all pages.
    ///
    /// See: <https://developers.google.com/calendar/api/v3/reference/events/list>
    #[instrument(skip(self))]
    pub fn list_calendar_events<'a>(
        &'a self,
        calendar_id: &'a str,
        time_min: Option<Timestamp>,
        time_max: Option<Timestamp>,
    ) -> impl Stream<Item = eyre::Result<CalendarEntry>> + use<'a> {
        PagedStream::new(move |page_token| async move {
            let response = self
                .list_calendar_events_page(calendar_id, time_min, time_max, page_token)
                .await?;
            let items = response.items.ok_or(MissingItems { resource: "events" })?;
            Ok((items, response.next_page_token))
        })
    }

    async fn list_calendar_events_page(
        &self,
        calendar_id: &str,
        time_min: Option<Timestamp>,
        time_max: Option<Timestamp>,
        page_token: Option<String>,
    ) -> eyre::Result<CalendarEventListResponse> {
        let url = self.url(&format!("/calendar/v3/calendars/{}/events", path_segment(calendar_id)));
        let time_min = time_min.map(|t| t.to_string());
        let time_max = time_max.map(|t| t.to_string());
        let mut query_params = vec![
            ("showDeleted", "false"),
            ("singleEvents", "true"),
            ("orderBy", "startTime"),
        ];
        if let Some(ref time_min) = time_min {
            query_params.push(("timeMin", time_min.as_str()));
        }
        if let Some(ref time_max) = time_max {
            query_params.push(("timeMax", time_max.as_str()));
        }
        if let Some(ref token) = page_token {
            query_params.push(("pageToken", token.as_str()));
        }

        let response = self
            .make_authenticated_request(Method::GET, &url, Some(&query_params), None::<&()>)
            .await?;
        let page: CalendarEventListResponse = response
            .json()
            .await
            .context("parse calendar events response as JSON")?;

        tracing::debug!(
            calendar_id,
            returned_items = page.items.as_ref().map(|items| items.len()),
            "fetched calendar events"
        );
        Ok(page)
    }

    /// Sets the location and description of a calendar event, leaving all else untouched.
    ///
    /// See: <https://developers.google.com/calendar/api/v3/reference/events/patch>
    #[instrument(skip(self, patch), err)]
    pub async fn patch_calendar_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &CalendarEventPatch<'_>,
    ) -> eyre::Result<()> {
        let url = self.url(&format!(
            "/calendar/v3/calendars/{}/events/{}",
            path_segment(calendar_id),
            path_segment(event_id)
        ));
        self.make_authenticated_request(Method::PATCH, &url, None, Some(patch))
            .await?;
        tracing::debug!(calendar_id, event_id, "updated calendar event");
        Ok(())
    }
}

/// Percent-encodes an identifier for use as a single URL path segment.
///
/// Calendar ids are email addresses and may contain `@` or `#`.
fn path_segment(id: &str) -> String {
    form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
