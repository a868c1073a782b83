//! OAuth 2.0 flows against Google: interactive sign-in, token refresh and revocation.
//!
//! Sign-in uses the installed-application flow with PKCE and a loopback redirect: a one-shot
//! HTTP server on `127.0.0.1` receives the authorization code after the user approves access
//! in their browser.

use bytes::Bytes;
use crate::google_api::discovery::ProviderEndpoints;
use eyre::Context;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RevocationUrl, Scope, StandardRevocableToken, TokenResponse, TokenUrl,
};
use std::future::Future;

/// Scopes needed for the calendar and live-broadcast operations plus the user's email.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.readonly",
    "https://www.googleapis.com/auth/calendar.events",
    "email",
];

const OAUTH_DONE_HTML: &str = "<!DOCTYPE html><html><body>\
    <p>Signed in. You can close this window and return to the application.</p>\
    </body></html>";

/// Runs OAuth operations for one application (client id).
#[derive(Debug, Clone)]
pub struct OAuthManager {
    client_id: String,
    client_secret: Option<String>,
    endpoints: ProviderEndpoints,
    http: reqwest::Client,
}

impl OAuthManager {
    /// `http` must not follow redirects.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<String>,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            endpoints,
            http,
        }
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn client_id(&self) -> ClientId {
        ClientId::new(self.client_id.clone())
    }

    fn client_secret(&self) -> Option<ClientSecret> {
        self.client_secret.clone().map(ClientSecret::new)
    }

    fn token_url(&self) -> eyre::Result<TokenUrl> {
        TokenUrl::new(self.endpoints.token_endpoint.clone()).context("parse token endpoint URL")
    }

    /// Walks the user through authorization in their browser and returns the issued token.
    ///
    /// With `select_account`, Google shows its account chooser even if the browser is
    /// already signed in to exactly one account.
    pub async fn authenticate(&self, select_account: bool) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = self
            .setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let auth_url = AuthUrl::new(self.endpoints.authorization_endpoint.clone())
            .context("parse authorization endpoint URL")?;
        let mut client = BasicClient::new(self.client_id())
            .set_auth_uri(auth_url)
            .set_token_uri(self.token_url()?)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = self.client_secret() {
            client = client.set_client_secret(secret);
        }

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = client
            // the flow runs exactly once, so the CSRF token is never re-used
            .authorize_url(move || csrf.clone())
            .add_scopes(SCOPES.iter().map(|scope| Scope::new(scope.to_string())))
            .add_extra_param("access_type", "offline")
            .set_pkce_challenge(pkce_challenge);
        if select_account {
            request = request.add_extra_param("prompt", "select_account consent");
        }
        let (auth_url, _csrf) = request.url();

        tracing::info!(url = %auth_url, select_account, "asking user to follow OAuth flow");
        webbrowser::open(auth_url.as_ref()).context("open user's browser")?;
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .context("exchange authorization code for access token")
    }

    /// Exchanges `token`'s refresh token for a new access token.
    ///
    /// `Ok(None)` means there is no refresh token or Google rejected it as an invalid grant;
    /// the user has to go through [`Self::authenticate`] again.
    pub async fn refresh_token(
        &self,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        let mut client = BasicClient::new(self.client_id()).set_token_uri(self.token_url()?);
        if let Some(secret) = self.client_secret() {
            client = client.set_client_secret(secret);
        }

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http)
            .await
        {
            Ok(new_token) => {
                tracing::debug!("refreshed OAuth token");
                Ok(Some(new_token))
            }
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(
                    sr.error(),
                    oauth2::basic::BasicErrorResponseType::InvalidGrant
                ) =>
            {
                tracing::warn!("refresh token considered an invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }

    /// Revokes the grant behind `token`.
    ///
    /// Revoking the refresh token (when there is one) also invalidates every access token
    /// issued from it.
    pub async fn revoke(&self, token: &BasicTokenResponse) -> eyre::Result<()> {
        let Some(revocation_endpoint) = &self.endpoints.revocation_endpoint else {
            tracing::debug!("provider has no revocation endpoint");
            return Ok(());
        };
        let revocation_url = RevocationUrl::new(revocation_endpoint.clone())
            .context("parse revocation endpoint URL")?;
        let mut client = BasicClient::new(self.client_id()).set_revocation_url(revocation_url);
        if let Some(secret) = self.client_secret() {
            client = client.set_client_secret(secret);
        }

        let revocable = match token.refresh_token() {
            Some(refresh) => StandardRevocableToken::RefreshToken(refresh.clone()),
            None => StandardRevocableToken::AccessToken(token.access_token().clone()),
        };
        client
            .revoke_token(revocable)
            .context("build revocation request")?
            .request_async(&self.http)
            .await
            .context("revoke OAuth token")
    }

    /// Binds a one-shot HTTP server on a random local port for the OAuth redirect.
    ///
    /// Returns the redirect URL and a future that resolves to the authorization code once
    /// the browser has been redirected back with a matching `state`.
    async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> eyre::Result<(
        RedirectUrl,
        impl Future<Output = eyre::Result<AuthorizationCode>>,
    )> {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind to localhost")?;
        let addr = socket.local_addr().context("get local address")?;
        let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
            .context("construct redirect url")?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let received = async move {
                let (conn, _) = socket.accept().await.context("accept")?;
                let conn = hyper_util::rt::TokioIo::new(conn);
                let (got, mut gotten) = tokio::sync::mpsc::channel(1);
                let service = service_fn(move |req: Request<body::Incoming>| {
                    let csrf = csrf.clone();
                    let got = got.clone();
                    async move {
                        let (state, code) = redirect_params(req.uri().query().unwrap_or(""));
                        if state.as_deref() != Some(csrf.secret().as_str()) {
                            return Err("invalid csrf token");
                        }
                        let Some(code) = code else {
                            return Err("no authorization code found");
                        };
                        if got.send(AuthorizationCode::new(code)).await.is_err() {
                            return Err("redirect server is shutting down");
                        }
                        Ok(Response::new(Full::<Bytes>::from(OAUTH_DONE_HTML)))
                    }
                });
                let mut serve = std::pin::pin!(
                    hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
                );

                tokio::select! {
                    exit = &mut serve => {
                        exit.context("redirect server got bad request")?;
                        eyre::bail!("redirect server exited before receiving a code");
                    }
                    code = gotten.recv() => {
                        serve.as_mut().graceful_shutdown();
                        code.ok_or_else(|| eyre::eyre!("redirect handler went away"))
                    }
                }
            };
            let _ = tx.send(received.await);
        });

        Ok((url, async move {
            rx.await.context("redirect server task ended prematurely")?
        }))
    }
}

/// Pulls `state` and `code` out of the redirect's query string.
fn redirect_params(query: &str) -> (Option<String>, Option<String>) {
    let mut state = None;
    let mut code = None;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match &*k {
            "state" => state = Some(v.into_owned()),
            "code" => code = Some(v.into_owned()),
            _ => {}
        }
    }
    (state, code)
}

#[cfg(test)]
mod tests {
    use crate::google_api::token::test_token;
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(server: &MockServer) -> OAuthManager {
        OAuthManager::new(
            "client.apps.googleusercontent.com",
            Some("not-so-secret".to_string()),
            ProviderEndpoints {
                authorization_endpoint: format!("{}/auth", server.uri()),
                token_endpoint: format!("{}/token", server.uri()),
                userinfo_endpoint: format!("{}/userinfo", server.uri()),
                revocation_endpoint: Some(format!("{}/revoke", server.uri())),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn redirect_params_are_decoded() {
        let (state, code) = redirect_params("state=abc%3D&code=4%2F0Ab&scope=email");
        assert_eq!(state.as_deref(), Some("abc="));
        assert_eq!(code.as_deref(), Some("4/0Ab"));
        assert_eq!(redirect_params(""), (None, None));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_none() {
        let server = MockServer::start().await;
        let refreshed = manager(&server)
            .refresh_token(&test_token("ya29.old", None))
            .await
            .unwrap();
        assert!(refreshed.is_none());
    }

    #[tokio::test]
    async fn invalid_grant_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let refreshed = manager(&server)
            .refresh_token(&test_token("ya29.old", Some("1//revoked")))
            .await
            .unwrap();
        assert!(refreshed.is_none());
    }

    #[tokio::test]
    async fn refresh_returns_the_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.new",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refreshed = manager(&server)
            .refresh_token(&test_token("ya29.old", Some("1//valid")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.access_token().secret(), "ya29.new");
    }
}
