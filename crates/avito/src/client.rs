//! Avito messenger REST client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use otvet_core::config::AvitoConfig;
use otvet_core::ports::{MessengerApi, MessengerError};

use crate::oauth::{OauthError, TokenManager};

const API_BASE: &str = "https://api.avito.ru";

#[derive(Debug, Error)]
pub enum AvitoApiError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("api rejected the request: {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl AvitoApiError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Auth(_) => false,
        }
    }
}

impl From<OauthError> for AvitoApiError {
    fn from(error: OauthError) -> Self {
        match error {
            OauthError::Transport(detail) => Self::Transport(detail),
            OauthError::Rejected(detail) | OauthError::Malformed(detail) => Self::Auth(detail),
        }
    }
}

/// Messenger operations scoped to one seller account. Holds the token
/// manager and retries exactly once on 401 after invalidating the cache.
pub struct MessengerClient {
    http: reqwest::Client,
    tokens: TokenManager,
    user_id: String,
}

impl MessengerClient {
    pub fn new(config: &AvitoConfig) -> Result<Self, AvitoApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AvitoApiError::Transport(e.to_string()))?;
        Ok(Self {
            tokens: TokenManager::new(http.clone(), config),
            http,
            user_id: config.user_id.clone(),
        })
    }

    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), AvitoApiError> {
        let url = format!(
            "{API_BASE}/messenger/v1/accounts/{}/chats/{chat_id}/messages",
            self.user_id
        );
        let body = json!({"message": {"text": text}, "type": "text"});
        debug!(event_name = "avito.messenger.send", chat_id);
        self.post_with_auth_retry(&url, Some(&body)).await
    }

    pub async fn mark_chat_read(&self, chat_id: &str) -> Result<(), AvitoApiError> {
        let url = format!(
            "{API_BASE}/messenger/v1/accounts/{}/chats/{chat_id}/read",
            self.user_id
        );
        debug!(event_name = "avito.messenger.mark_read", chat_id);
        self.post_with_auth_retry(&url, None).await
    }

    /// Points the messenger webhook subscription at `url`.
    pub async fn register_webhook(&self, url: &str) -> Result<(), AvitoApiError> {
        let endpoint = format!("{API_BASE}/messenger/v3/webhook");
        let body = json!({"url": url});
        debug!(event_name = "avito.messenger.register_webhook", url);
        self.post_with_auth_retry(&endpoint, Some(&body)).await
    }

    async fn post_with_auth_retry(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(), AvitoApiError> {
        match self.post_once(url, body).await {
            Err(AvitoApiError::Auth(detail)) => {
                // A cached token may have been revoked server-side.
                warn!(event_name = "avito.auth.retry", detail = %detail);
                self.tokens.invalidate().await;
                self.post_once(url, body).await
            }
            other => other,
        }
    }

    async fn post_once(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(), AvitoApiError> {
        let token = self.tokens.access_token().await?;
        let mut request = self.http.post(url).bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AvitoApiError::Transport(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AvitoApiError::Auth("401 from messenger api".to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(AvitoApiError::RateLimited { retry_after_secs });
        }

        let body = response.text().await.unwrap_or_default();
        Err(AvitoApiError::Rejected { status: status.as_u16(), body })
    }
}

#[async_trait]
impl MessengerApi for MessengerClient {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), MessengerError> {
        self.send_text(conversation_id, text).await.map_err(to_messenger_error)
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), MessengerError> {
        self.mark_chat_read(conversation_id).await.map_err(to_messenger_error)
    }
}

fn to_messenger_error(error: AvitoApiError) -> MessengerError {
    if error.is_transient() {
        MessengerError::Transient(error.to_string())
    } else {
        MessengerError::Permanent(error.to_string())
    }
}
