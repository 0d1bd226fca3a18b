//! Calendar provider adapters.
//!
//! Each adapter turns one vendor's event shape into a
//! [`NormalizedCalendarEvent`] and back. The sync engine only ever talks to
//! the [`CalendarProvider`] trait.

mod google;
pub mod keyring_store;
mod memory;
mod microsoft;
pub mod oauth;

pub use google::GoogleProvider;
pub use memory::MemoryProvider;
pub use microsoft::MicrosoftProvider;
pub use oauth::{Authenticator, KeyringTokenStore, MemoryTokenStore, OAuthConfig, TokenStore};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::error::{CoreError, OAuthError};
use crate::model::{NormalizedCalendarEvent, ProviderKind, TimeWindow};
use crate::storage::Config;
use crate::sync::SyncError;

/// Private property name holding the local item id on exported events.
pub const LOCAL_ID_PROPERTY: &str = "assignsync_local_id";

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Every event overlapping `window`, across all pages. Cancelled events
    /// come back with `status = cancelled` when the provider reports them.
    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<NormalizedCalendarEvent>, SyncError>;

    /// `None` when the provider no longer knows the event.
    async fn get_event(
        &self,
        calendar_id: &str,
        id: &str,
    ) -> Result<Option<NormalizedCalendarEvent>, SyncError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError>;

    /// Deleting an event that is already gone succeeds.
    async fn delete_event(&self, calendar_id: &str, id: &str) -> Result<(), SyncError>;
}

/// OAuth client settings for `provider`, with credentials from the keyring.
pub fn oauth_config(config: &Config, provider: ProviderKind) -> Result<OAuthConfig, OAuthError> {
    let service = provider.as_str();
    match provider {
        ProviderKind::Google => {
            let id = keyring_store::require_credential(service, "client_id")?;
            let secret = keyring_store::require_credential(service, "client_secret")?;
            Ok(OAuthConfig::google(&id, &secret, config.google.redirect_port))
        }
        ProviderKind::Microsoft => {
            let id = keyring_store::require_credential(service, "client_id")?;
            Ok(OAuthConfig::microsoft(
                &id,
                &config.microsoft.tenant,
                config.microsoft.redirect_port,
            ))
        }
        ProviderKind::Memory => Err(OAuthError::AuthorizationFailed(
            "the memory provider needs no authorization".into(),
        )),
    }
}

/// Build the provider selected in `config`.
///
/// The memory provider persists to `memory-calendar.json` under `data_dir`.
pub fn connect(
    config: &Config,
    store: Arc<dyn TokenStore>,
    data_dir: &Path,
) -> Result<Arc<dyn CalendarProvider>, CoreError> {
    let kind = config.sync.provider;
    let provider: Arc<dyn CalendarProvider> = match kind {
        ProviderKind::Google => {
            let auth = Authenticator::new(kind, oauth_config(config, kind)?, store);
            Arc::new(GoogleProvider::new(auth).with_base_url(&config.google.api_base))
        }
        ProviderKind::Microsoft => {
            let auth = Authenticator::new(kind, oauth_config(config, kind)?, store);
            Arc::new(MicrosoftProvider::new(auth).with_base_url(&config.microsoft.api_base))
        }
        ProviderKind::Memory => Arc::new(MemoryProvider::persistent(
            data_dir.join("memory-calendar.json"),
        )?),
    };
    tracing::debug!(provider = %kind, "calendar provider ready");
    Ok(provider)
}

/// Authenticated HTTP access shared by the REST adapters.
pub(crate) struct ApiClient {
    http: Client,
    auth: Authenticator,
    kind: ProviderKind,
}

impl ApiClient {
    pub(crate) fn new(kind: ProviderKind, auth: Authenticator) -> Self {
        Self {
            http: Client::new(),
            auth,
            kind,
        }
    }

    /// Send the request built by `build`. A 401 triggers one token refresh
    /// and one retry.
    pub(crate) async fn send<F>(&self, build: F) -> Result<Response, SyncError>
    where
        F: Fn(&Client, &str) -> RequestBuilder + Send + Sync,
    {
        let token = self.auth.access_token().await?;
        let resp = build(&self.http, &token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!(provider = %self.kind, "got 401, refreshing token");
        let token = self.auth.force_refresh().await?;
        Ok(build(&self.http, &token).send().await?)
    }

    /// Send and map any non-success status to a [`SyncError`].
    pub(crate) async fn send_checked<F>(&self, build: F) -> Result<Response, SyncError>
    where
        F: Fn(&Client, &str) -> RequestBuilder + Send + Sync,
    {
        let resp = self.send(build).await?;
        check_status(self.kind, resp).await
    }
}

/// Map an HTTP error response to a [`SyncError`].
pub(crate) async fn check_status(kind: ProviderKind, resp: Response) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED => SyncError::AuthenticationRequired(kind),
        StatusCode::NOT_FOUND | StatusCode::GONE => SyncError::EventNotFound(url),
        StatusCode::TOO_MANY_REQUESTS => {
            SyncError::RateLimited(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS))
        }
        // Google reports quota exhaustion as 403 with a rate-limit reason.
        StatusCode::FORBIDDEN if is_rate_limit_reason(&body) => {
            SyncError::RateLimited(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS))
        }
        StatusCode::SERVICE_UNAVAILABLE => SyncError::Unavailable(message),
        _ => SyncError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

/// `error.message` from a Google or Graph error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .map(String::from)
}

/// Whether a Google error body carries a rate-limit reason.
fn is_rate_limit_reason(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value["error"]["errors"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|e| e["reason"].as_str())
        .any(|reason| matches!(reason, "rateLimitExceeded" | "userRateLimitExceeded"))
}
