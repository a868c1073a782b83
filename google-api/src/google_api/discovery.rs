//! OpenID Connect discovery of the provider's OAuth endpoints.

use eyre::Context;
use serde::Deserialize;
use tracing::instrument;

/// The subset of the discovery document this crate uses.
///
/// See: <https://developers.google.com/identity/openid-connect/openid-connect#discovery>
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}

/// Fetches `<issuer>/.well-known/openid-configuration`.
#[instrument(skip(http), err)]
pub async fn discover(http: &reqwest::Client, issuer: &str) -> eyre::Result<ProviderEndpoints> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );
    let response = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("fetch discovery document from {url}"))?
        .error_for_status()
        .context("discovery document request was rejected")?;
    let endpoints: ProviderEndpoints = response
        .json()
        .await
        .context("parse discovery document as JSON")?;

    tracing::debug!(
        token_endpoint = %endpoints.token_endpoint,
        userinfo_endpoint = %endpoints.userinfo_endpoint,
        "discovered OAuth endpoints"
    );
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn discovers_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://accounts.google.com",
                "authorization_endpoint": "https://accounts.google.com/o/oauth2/v2/auth",
                "token_endpoint": "https://oauth2.googleapis.com/token",
                "userinfo_endpoint": "https://openidconnect.googleapis.com/v1/userinfo",
                "revocation_endpoint": "https://oauth2.googleapis.com/revoke",
                "scopes_supported": ["openid", "email", "profile"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let endpoints = discover(&reqwest::Client::new(), &format!("{}/", server.uri()))
            .await
            .unwrap();
        assert_eq!(endpoints.token_endpoint, "https://oauth2.googleapis.com/token");
        assert_eq!(
            endpoints.revocation_endpoint.as_deref(),
            Some("https://oauth2.googleapis.com/revoke")
        );
    }

    #[tokio::test]
    async fn rejected_discovery_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(
            discover(&reqwest::Client::new(), &server.uri())
                .await
                .is_err()
        );
    }
}
