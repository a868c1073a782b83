//! Access token lifetime tracking and on-disk persistence.

use crate::google_api::oauth::OAuthManager;
use eyre::Context;
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// An OAuth token together with the moment it should be considered expired.
#[derive(Debug, Clone)]
pub struct TimeBoundAccessToken {
    token: BasicTokenResponse,
    /// Real expiry minus a safety buffer.
    expires_at: SystemTime,
}

impl TimeBoundAccessToken {
    /// Wraps a token loaded from storage.
    ///
    /// Its issue time is unknown, so it is treated as already expired and gets refreshed
    /// before first use.
    pub fn expired(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: SystemTime::UNIX_EPOCH,
            token,
        }
    }

    /// Wraps a token that was just issued.
    pub fn new(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: Self::expiry_of(&token),
            token,
        }
    }

    pub fn raw_token(&self) -> &BasicTokenResponse {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    pub(crate) fn access_token(&self) -> &str {
        self.token.access_token().secret()
    }

    /// Refreshes the token in place.
    ///
    /// Returns `Ok(false)` if the provider no longer accepts the refresh token (or there is
    /// none), in which case the user has to sign in again.
    pub async fn refresh(&mut self, oauth: &OAuthManager) -> eyre::Result<bool> {
        tracing::trace!("refreshing access token");
        let Some(new_token) = oauth
            .refresh_token(&self.token)
            .await
            .context("refresh OAuth token")?
        else {
            return Ok(false);
        };

        let old_token = std::mem::replace(&mut self.token, new_token);
        // Google only hands out a refresh token on the initial exchange.
        if self.token.refresh_token().is_none() {
            self.token.set_refresh_token(old_token.refresh_token().cloned());
        }
        self.expires_at = Self::expiry_of(&self.token);
        Ok(true)
    }

    fn expiry_of(token: &BasicTokenResponse) -> SystemTime {
        let now = SystemTime::now();
        match token.expires_in() {
            Some(expires_in) => (now + expires_in)
                .checked_sub(Duration::from_secs(300))
                .unwrap_or(now),
            // assume the usual hour, minus the same buffer
            None => now + Duration::from_secs(3300),
        }
    }
}

/// Where the signed-in user's token is kept between runs.
///
/// A store without a path keeps nothing, so every process starts signed out.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("check for token file {}", path.display()))?
        {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read token file {}", path.display()))?;
        let token = serde_json::from_str(&json).context("parse stored OAuth token")?;
        Ok(Some(token))
    }

    pub async fn save(&self, token: &BasicTokenResponse) -> eyre::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string(token).context("serialize OAuth token")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("write token file {}", path.display()))
    }

    pub async fn clear(&self) -> eyre::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("remove token file {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_token(access_token: &str, refresh_token: Option<&str>) -> BasicTokenResponse {
    let mut json = serde_json::json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 3599,
    });
    if let Some(refresh_token) = refresh_token {
        json["refresh_token"] = refresh_token.into();
    }
    serde_json::from_value(json).expect("valid token response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tokens_are_not_expired() {
        let token = TimeBoundAccessToken::new(test_token("ya29.fresh", None));
        assert!(!token.is_expired());
        assert_eq!(token.access_token(), "ya29.fresh");

        let stored = TimeBoundAccessToken::expired(test_token("ya29.stored", None));
        assert!(stored.is_expired());
    }

    #[tokio::test]
    async fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(Some(dir.path().join("token.json")));

        assert!(store.load().await.unwrap().is_none());
        store
            .save(&test_token("ya29.saved", Some("1//refresh")))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token().secret(), "ya29.saved");
        assert_eq!(
            loaded.refresh_token().map(|t| t.secret().as_str()),
            Some("1//refresh")
        );

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        // clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn pathless_store_keeps_nothing() {
        let store = TokenStore::default();
        store.save(&test_token("ya29.gone", None)).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
