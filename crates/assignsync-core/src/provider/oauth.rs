//! Lightweight OAuth2 Authorization Code flow for desktop apps.
//!
//! 1. Opens browser to authorization URL
//! 2. Listens on localhost for the callback
//! 3. Exchanges the code for an access token (+ refresh token)
//! 4. Stores tokens through a [`TokenStore`] (the OS keyring by default)
//!
//! Microsoft requires PKCE for public clients; Google gets a client secret.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::keyring_store;
use crate::error::OAuthError;
use crate::model::ProviderKind;
use crate::sync::SyncError;

/// Seconds to wait for the browser callback.
pub const CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Tokens are treated as expired this many seconds early.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub service_name: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_port: u16,
    pub use_pkce: bool,
}

impl OAuthConfig {
    pub fn google(client_id: &str, client_secret: &str, redirect_port: u16) -> Self {
        Self {
            service_name: ProviderKind::Google.as_str().to_string(),
            client_id: client_id.to_string(),
            client_secret: Some(client_secret.to_string()),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/calendar.events".to_string()],
            redirect_port,
            use_pkce: false,
        }
    }

    pub fn microsoft(client_id: &str, tenant: &str, redirect_port: u16) -> Self {
        let base = format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0");
        Self {
            service_name: ProviderKind::Microsoft.as_str().to_string(),
            client_id: client_id.to_string(),
            client_secret: None,
            auth_url: format!("{base}/authorize"),
            token_url: format!("{base}/token"),
            scopes: vec![
                "offline_access".to_string(),
                "https://graph.microsoft.com/Calendars.ReadWrite".to_string(),
            ],
            redirect_port,
            use_pkce: true,
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    pub fn auth_url_full(&self, state: &str, code_challenge: Option<&str>) -> String {
        let scopes = self.scopes.join(" ");
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
        );
        if let Some(challenge) = code_challenge {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method=S256",
                urlencoding::encode(challenge)
            ));
        }
        if self.client_secret.is_some() {
            // Google only issues a refresh token with offline access + consent.
            url.push_str("&access_type=offline&prompt=consent");
        }
        url
    }
}

/// PKCE verifier/challenge pair (RFC 7636, S256).
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier = random_token(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Where tokens live between runs.
pub trait TokenStore: Send + Sync {
    fn load(&self, service: &str) -> Result<Option<OAuthTokens>, OAuthError>;
    fn store(&self, service: &str, tokens: &OAuthTokens) -> Result<(), OAuthError>;
    fn clear(&self, service: &str) -> Result<(), OAuthError>;
}

/// Tokens as JSON in the OS keyring, keyed by service name.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringTokenStore;

impl TokenStore for KeyringTokenStore {
    fn load(&self, service: &str) -> Result<Option<OAuthTokens>, OAuthError> {
        match keyring_store::get(service)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| OAuthError::Keyring(format!("stored tokens are unreadable: {e}"))),
            None => Ok(None),
        }
    }

    fn store(&self, service: &str, tokens: &OAuthTokens) -> Result<(), OAuthError> {
        let json = serde_json::to_string(tokens)
            .map_err(|e| OAuthError::Keyring(e.to_string()))?;
        keyring_store::set(service, &json)
    }

    fn clear(&self, service: &str) -> Result<(), OAuthError> {
        keyring_store::delete(service)
    }
}

/// In-process token store for tests.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, OAuthTokens>>,
}

impl MemoryTokenStore {
    pub fn with_tokens(service: &str, tokens: OAuthTokens) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.tokens.lock() {
            map.insert(service.to_string(), tokens);
        }
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, service: &str) -> Result<Option<OAuthTokens>, OAuthError> {
        let map = self
            .tokens
            .lock()
            .map_err(|_| OAuthError::Keyring("token store poisoned".into()))?;
        Ok(map.get(service).cloned())
    }

    fn store(&self, service: &str, tokens: &OAuthTokens) -> Result<(), OAuthError> {
        let mut map = self
            .tokens
            .lock()
            .map_err(|_| OAuthError::Keyring("token store poisoned".into()))?;
        map.insert(service.to_string(), tokens.clone());
        Ok(())
    }

    fn clear(&self, service: &str) -> Result<(), OAuthError> {
        let mut map = self
            .tokens
            .lock()
            .map_err(|_| OAuthError::Keyring("token store poisoned".into()))?;
        map.remove(service);
        Ok(())
    }
}

/// Wait up to `wait` for the browser to hit the loopback listener.
async fn accept_callback(listener: &TcpListener, wait: Duration) -> Result<TcpStream, OAuthError> {
    let (stream, _) = tokio::time::timeout(wait, listener.accept())
        .await
        .map_err(|_| OAuthError::CallbackTimeout {
            timeout_secs: wait.as_secs(),
        })?
        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;
    Ok(stream)
}

/// Run the full OAuth2 flow: open browser -> listen for callback -> exchange code.
///
/// `show_url` receives the authorization URL in case the browser cannot be
/// opened.
pub async fn authorize(
    http: &Client,
    config: &OAuthConfig,
    store: &dyn TokenStore,
    show_url: &dyn Fn(&str),
) -> Result<OAuthTokens, OAuthError> {
    let pkce = config.use_pkce.then(Pkce::generate);
    let state = random_token(16);
    let auth_url = config.auth_url_full(&state, pkce.as_ref().map(|p| p.challenge.as_str()));

    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port))
        .await
        .map_err(|e| OAuthError::AuthorizationFailed(format!("cannot listen for callback: {e}")))?;

    show_url(&auth_url);
    if let Err(e) = open::that(&auth_url) {
        tracing::warn!(error = %e, "could not open browser");
    }

    let mut stream =
        accept_callback(&listener, Duration::from_secs(CALLBACK_TIMEOUT_SECS)).await?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let params = extract_query(&request)
        .ok_or_else(|| OAuthError::InvalidCallback("malformed callback request".into()))?;

    let outcome = check_callback(&params, &state);
    let page = match &outcome {
        Ok(_) => "<h2>Authentication successful!</h2><p>You can close this tab.</p>",
        Err(_) => "<h2>Authentication failed.</h2><p>Return to the terminal for details.</p>",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body>{page}</body></html>"
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!(error = %e, "failed to answer browser");
    }
    drop(stream);
    drop(listener);

    let code = outcome?;
    let tokens = exchange_code(
        http,
        config,
        &code,
        pkce.as_ref().map(|p| p.verifier.as_str()),
    )
    .await?;
    store.store(&config.service_name, &tokens)?;
    tracing::info!(service = %config.service_name, "authorization complete");
    Ok(tokens)
}

fn check_callback(params: &HashMap<String, String>, state: &str) -> Result<String, OAuthError> {
    if let Some(error) = params.get("error") {
        return Err(OAuthError::AuthorizationFailed(error.clone()));
    }
    if params.get("state").map(String::as_str) != Some(state) {
        return Err(OAuthError::InvalidCallback("state mismatch".into()));
    }
    params
        .get("code")
        .cloned()
        .ok_or_else(|| OAuthError::InvalidCallback("no code in callback".into()))
}

/// Exchange authorization code for tokens.
async fn exchange_code(
    http: &Client,
    config: &OAuthConfig,
    code: &str,
    verifier: Option<&str>,
) -> Result<OAuthTokens, OAuthError> {
    let redirect_uri = config.redirect_uri();
    let mut params = vec![
        ("client_id", config.client_id.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri.as_str()),
    ];
    if let Some(secret) = &config.client_secret {
        params.push(("client_secret", secret.as_str()));
    }
    if let Some(verifier) = verifier {
        params.push(("code_verifier", verifier));
    }

    let body: serde_json::Value = http
        .post(&config.token_url)
        .form(&params)
        .send()
        .await?
        .json()
        .await?;

    parse_token_response(&body, None).map_err(OAuthError::TokenExchangeFailed)
}

/// Refresh an access token using a refresh token.
pub async fn refresh_token(
    http: &Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<OAuthTokens, OAuthError> {
    let mut params = vec![
        ("client_id", config.client_id.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = &config.client_secret {
        params.push(("client_secret", secret.as_str()));
    }

    let body: serde_json::Value = http
        .post(&config.token_url)
        .form(&params)
        .send()
        .await?
        .json()
        .await?;

    parse_token_response(&body, Some(refresh)).map_err(OAuthError::TokenRefreshFailed)
}

/// Token endpoint response -> tokens. Providers may omit the refresh token on
/// refresh; the previous one is kept then.
fn parse_token_response(
    body: &serde_json::Value,
    previous_refresh: Option<&str>,
) -> Result<OAuthTokens, String> {
    if let Some(error) = body.get("error") {
        let detail = body
            .get("error_description")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        return Err(format!("{error} {detail}").trim().to_string());
    }

    let access_token = body["access_token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or("response has no access_token")?
        .to_string();
    let expires_at = body
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .map(|ei| chrono::Utc::now().timestamp() + ei);

    Ok(OAuthTokens {
        access_token,
        refresh_token: body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| previous_refresh.map(String::from)),
        expires_at,
        token_type: body["token_type"].as_str().unwrap_or("Bearer").to_string(),
        scope: body.get("scope").and_then(|v| v.as_str()).map(String::from),
    })
}

/// Check if stored tokens are expired (with 60s buffer).
pub fn is_expired(tokens: &OAuthTokens) -> bool {
    match tokens.expires_at {
        Some(exp) => chrono::Utc::now().timestamp() > exp - EXPIRY_SKEW_SECS,
        None => false,
    }
}

fn extract_query(request: &str) -> Option<HashMap<String, String>> {
    let first_line = request.lines().next()?;
    let path = first_line.split_whitespace().nth(1)?;
    let url = url::Url::parse(&format!("http://localhost{path}")).ok()?;
    Some(url.query_pairs().into_owned().collect())
}

/// Hands out valid access tokens for one provider, refreshing as needed.
pub struct Authenticator {
    provider: ProviderKind,
    http: Client,
    config: OAuthConfig,
    store: Arc<dyn TokenStore>,
}

impl Authenticator {
    pub fn new(provider: ProviderKind, config: OAuthConfig, store: Arc<dyn TokenStore>) -> Self {
        Self {
            provider,
            http: Client::new(),
            config,
            store,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.store.load(&self.config.service_name), Ok(Some(_)))
    }

    /// Current access token, refreshed first if it is about to expire.
    pub async fn access_token(&self) -> Result<String, SyncError> {
        let tokens = self.load()?;
        if !is_expired(&tokens) {
            return Ok(tokens.access_token);
        }
        tracing::debug!(provider = %self.provider, "access token expired, refreshing");
        self.refresh(&tokens).await
    }

    /// Refresh regardless of expiry (after a 401).
    pub async fn force_refresh(&self) -> Result<String, SyncError> {
        let tokens = self.load()?;
        self.refresh(&tokens).await
    }

    fn load(&self) -> Result<OAuthTokens, SyncError> {
        self.store
            .load(&self.config.service_name)?
            .ok_or(SyncError::AuthenticationRequired(self.provider))
    }

    async fn refresh(&self, tokens: &OAuthTokens) -> Result<String, SyncError> {
        let refresh = tokens
            .refresh_token
            .as_deref()
            .ok_or(SyncError::AuthenticationRequired(self.provider))?;
        let refreshed = refresh_token(&self.http, &self.config, refresh).await?;
        self.store.store(&self.config.service_name, &refreshed)?;
        Ok(refreshed.access_token)
    }
}
