//! OAuth 2.0 authorization-code flow pieces for Google.
//!
//! - [`PkceFlow`]: code verifier/challenge and the CSRF `state` token
//! - [`OAuthClient`]: token exchange, token refresh and user-info calls
//! - [`BrowserLauncher`]: how the consent page reaches the user
//! - [`CallbackListener`]: the loopback listener that receives the redirect
//!
//! The state machine that strings these together is
//! [`Authenticator`](super::auth::Authenticator).

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};

use super::config::{GoogleConfig, OAuthCredentials, OAuthEndpoints};
use super::tokens::Credential;

/// The PKCE code verifier length (in bytes, before base64 encoding).
const CODE_VERIFIER_LENGTH: usize = 32;

/// Random bytes in the CSRF state token.
const STATE_LENGTH: usize = 32;

/// PKCE verifier/challenge pair and CSRF state for one handshake.
#[derive(Debug)]
pub struct PkceFlow {
    pub verifier: String,
    /// SHA-256 of the verifier, base64url encoded.
    pub challenge: String,
    /// Echoed back by Google on the redirect; anything else is forged.
    pub state: String,
}

impl PkceFlow {
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: random_token(STATE_LENGTH),
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Response from Google's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Space-separated scopes actually granted.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Builds a credential, recording the granted scopes when Google lists
    /// them and the requested ones otherwise.
    pub fn into_credential(self, requested: &[String]) -> Credential {
        let scopes = match self.scope {
            Some(ref granted) => granted.split_whitespace().map(String::from).collect(),
            None => requested.to_vec(),
        };
        Credential::new(
            self.access_token,
            self.refresh_token,
            self.expires_in,
            scopes,
        )
    }
}

/// Identity returned by the user-info endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    /// Avatar URL.
    #[serde(default)]
    pub picture: String,
}

/// HTTP side of the OAuth flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    endpoints: OAuthEndpoints,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;
        Ok(Self {
            credentials: config.credentials.clone(),
            endpoints: config.endpoints.clone(),
            http,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Builds the consent page URL.
    pub fn authorization_url(
        &self,
        pkce: &PkceFlow,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            self.endpoints.auth_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
            urlencoding::encode(&pkce.challenge),
            urlencoding::encode(&pkce.state),
        )
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> ProviderResult<TokenResponse> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        let token = self.post_token(&params).await?;
        info!("obtained tokens");
        Ok(token)
    }

    /// Trades a refresh token for a new access token.
    ///
    /// A revoked or expired grant surfaces as
    /// [`ProviderErrorCode::InvalidGrant`](crate::ProviderErrorCode::InvalidGrant).
    pub async fn refresh(&self, refresh_token: &str) -> ProviderResult<TokenResponse> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let token = self.post_token(&params).await?;
        info!("refreshed access token");
        Ok(token)
    }

    async fn post_token(&self, params: &[(&str, &str)]) -> ProviderResult<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {}", e))
        })
    }

    /// Looks up the signed-in user's email, name and avatar.
    pub async fn userinfo(&self, access_token: &str) -> ProviderResult<UserInfo> {
        let response = self
            .http
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let info: UserInfo = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid user-info response: {}", e))
        })?;
        if info.email.is_empty() {
            return Err(ProviderError::invalid_response(
                "user-info response has no email address",
            ));
        }
        Ok(info)
    }
}

/// Opens the consent page for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> ProviderResult<()>;
}

/// Uses the desktop's default URL handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> ProviderResult<()> {
        open::that(url).map_err(|e| {
            warn!("failed to open browser for {}", url);
            ProviderError::authentication(format!("failed to open browser: {}", e)).with_source(e)
        })
    }
}

/// Loopback HTTP listener that waits for Google's redirect.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Binds `127.0.0.1:port`. Port 0 picks a free port.
    pub async fn bind(port: u16) -> ProviderResult<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            ProviderError::configuration(format!(
                "cannot listen for the OAuth callback on port {}: {}",
                port, e
            ))
            .with_source(e)
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| ProviderError::internal(format!("no local address: {}", e)))?
            .port();
        debug!(port, "callback listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, GoogleConfig::CALLBACK_PATH)
    }

    /// Waits for the redirect and returns the authorization code.
    ///
    /// Each connection is handled on its own task, so a browser's idle
    /// speculative connection cannot hold up the redirect. Requests for
    /// other paths get a 404 and are otherwise ignored. The first request
    /// on the callback path decides the outcome. The listener and any open
    /// connections are closed when this returns, whatever the outcome.
    pub async fn wait_for_code(self, expected_state: &str, timeout: Duration) -> ProviderResult<String> {
        let (tx, mut rx) = mpsc::channel(1);
        let expected_state = expected_state.to_string();
        let listener = self.listener;

        let task = tokio::spawn(async move {
            // Dropped with this task, which aborts connections still open.
            let mut connections = JoinSet::new();
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        let _ = tx.try_send(Err(ProviderError::network(format!(
                            "callback listener failed: {}",
                            e
                        ))));
                        return;
                    }
                };
                let tx = tx.clone();
                let expected_state = expected_state.clone();
                connections.spawn(async move {
                    if let Some(outcome) = handle_request(stream, &expected_state).await {
                        let _ = tx.try_send(outcome);
                    }
                });
                while connections.try_join_next().is_some() {}
            }
        });

        let outcome = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => Err(ProviderError::internal("callback channel closed")),
            Err(_) => Err(ProviderError::timeout(format!(
                "no OAuth callback within {}s",
                timeout.as_secs()
            ))),
        };
        task.abort();
        debug!("callback listener closed");
        outcome
    }
}

/// Handles one connection. Returns `None` if it was not the redirect.
async fn handle_request(
    mut stream: TcpStream,
    expected_state: &str,
) -> Option<ProviderResult<String>> {
    let mut request_line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        if reader.read_line(&mut request_line).await.is_err() {
            return None;
        }
        // Drain the headers so closing the socket does not reset it.
        let mut header = String::new();
        loop {
            header.clear();
            match reader.read_line(&mut header).await {
                Ok(0) | Err(_) => break,
                Ok(_) if header.trim().is_empty() => break,
                Ok(_) => {}
            }
        }
    }

    // GET /callback?code=...&state=... HTTP/1.1
    let target = match request_line.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["GET", target, ..] => target.to_string(),
        _ => {
            respond(&mut stream, "400 Bad Request", "Bad request").await;
            return None;
        }
    };
    let Ok(url) = url::Url::parse(&format!("http://127.0.0.1{}", target)) else {
        respond(&mut stream, "400 Bad Request", "Bad request").await;
        return None;
    };
    if url.path() != GoogleConfig::CALLBACK_PATH {
        respond(&mut stream, "404 Not Found", "Not found").await;
        return None;
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };
    let (state, code, error) = (param("state"), param("code"), param("error"));

    let outcome = if state != expected_state {
        warn!("OAuth callback state mismatch");
        Err(ProviderError::authentication(
            "OAuth state mismatch, callback rejected",
        ))
    } else if !error.is_empty() {
        Err(ProviderError::authentication(format!(
            "authorization denied: {}",
            error
        )))
    } else if code.is_empty() {
        Err(ProviderError::authentication("user rejected access"))
    } else {
        Ok(code)
    };

    match outcome {
        Ok(_) => {
            respond(
                &mut stream,
                "200 OK",
                "Signed in. You can close this window and return to your launcher.",
            )
            .await
        }
        Err(ref e) => {
            respond(
                &mut stream,
                "400 Bad Request",
                &format!("Sign-in failed: {}", e.message()),
            )
            .await
        }
    }
    Some(outcome)
}

async fn respond(stream: &mut TcpStream, status: &str, message: &str) {
    let body = format!(
        "<!doctype html><html><head><title>quickcal</title></head>\
        <body><p>{}</p></body></html>",
        html_escape(message)
    );
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\n\
        Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn send(port: u16, target: &str) -> String {
        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target).unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    #[test]
    fn pkce_lengths_and_randomness() {
        let a = PkceFlow::new();
        let b = PkceFlow::new();
        // 32 bytes base64url without padding
        assert_eq!(a.verifier.len(), 43);
        assert_eq!(a.state.len(), 43);
        assert_ne!(a.state, b.state);
        assert_ne!(a.challenge, b.challenge);
        assert_eq!(a.challenge, PkceFlow::compute_challenge(&a.verifier));
    }

    #[test]
    fn authorization_url_carries_state_and_scopes() {
        let config = GoogleConfig::new(OAuthCredentials::new("cid", "secret"));
        let client = OAuthClient::new(&config).unwrap();
        let pkce = PkceFlow::new();
        let url = client.authorization_url(
            &pkce,
            "http://127.0.0.1:61432/callback",
            &["a b".to_string()],
        );
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains(&format!("state={}", urlencoding::encode(&pkce.state))));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("scope=a%20b"));
    }

    #[test]
    fn token_response_prefers_granted_scopes() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","expires_in":3600,"scope":"x y"}"#,
        )
        .unwrap();
        let cred = token.into_credential(&["z".to_string()]);
        assert_eq!(cred.scopes, vec!["x", "y"]);

        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(token.into_credential(&["z".to_string()]).scopes, vec!["z"]);
    }

    #[tokio::test]
    async fn callback_returns_code_for_matching_state() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();
        let client = std::thread::spawn(move || {
            let not_found = send(port, "/favicon.ico");
            let ok = send(port, "/callback?state=s3cret&code=4%2Fabc");
            (not_found, ok)
        });
        let code = listener
            .wait_for_code("s3cret", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, "4/abc");

        let (not_found, ok) = client.join().unwrap();
        assert!(not_found.starts_with("HTTP/1.1 404"));
        assert!(ok.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn callback_rejects_wrong_state_and_closes() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();
        let client = std::thread::spawn(move || send(port, "/callback?state=forged&code=abc"));
        let err = listener
            .wait_for_code("expected", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::AuthenticationFailed);
        assert!(err.message().contains("state mismatch"));
        assert!(client.join().unwrap().starts_with("HTTP/1.1 400"));

        // The port is free again.
        tokio::task::yield_now().await;
        assert!(CallbackListener::bind(port).await.is_ok());
    }

    #[tokio::test]
    async fn callback_surfaces_provider_error_and_rejection() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();
        std::thread::spawn(move || send(port, "/callback?state=s&error=access_denied"));
        let err = listener
            .wait_for_code("s", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.message().contains("access_denied"));

        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();
        std::thread::spawn(move || send(port, "/callback?state=s"));
        let err = listener
            .wait_for_code("s", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "user rejected access");
    }

    #[tokio::test]
    async fn idle_connection_does_not_block_callback() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();
        let client = std::thread::spawn(move || {
            let idle = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
            let ok = send(port, "/callback?state=s&code=abc");
            drop(idle);
            ok
        });
        let code = listener
            .wait_for_code("s", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(code, "abc");
        assert!(client.join().unwrap().starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn callback_times_out() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let err = listener
            .wait_for_code("s", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::Timeout);
    }
}
