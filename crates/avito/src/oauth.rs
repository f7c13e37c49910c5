//! Client-credentials token cache for the Avito API.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use otvet_core::config::AvitoConfig;

const TOKEN_URL: &str = "https://api.avito.ru/token";
/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum OauthError {
    #[error("token request failed: {0}")]
    Transport(String),
    #[error("credentials rejected: {0}")]
    Rejected(String),
    #[error("malformed token response: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

/// Fetches and caches an application token. One in-flight refresh at a
/// time; callers share the cached value until the expiry margin.
pub struct TokenManager {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, config: &AvitoConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<SecretString, OauthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_with_retry().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Retries the token fetch on transport failures only. Rejected
    /// credentials and malformed responses fail immediately.
    async fn fetch_with_retry(&self) -> Result<CachedToken, OauthError> {
        let mut attempt = 1;
        loop {
            match self.fetch().await {
                Ok(token) => return Ok(token),
                Err(OauthError::Transport(reason)) if attempt < FETCH_ATTEMPTS => {
                    let delay = FETCH_BASE_DELAY * (1_u32 << (attempt - 1));
                    warn!(
                        event_name = "avito.oauth.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Drops the cached token so the next call fetches a fresh one. Used
    /// after the API answers 401 on a supposedly valid token.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn fetch(&self) -> Result<CachedToken, OauthError> {
        debug!(event_name = "avito.oauth.refresh", client_id = %self.client_id);
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| OauthError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::FORBIDDEN {
            // Bad credentials will not get better with retries.
            let body = response.text().await.unwrap_or_default();
            return Err(OauthError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(OauthError::Transport(format!("token endpoint answered {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OauthError::Malformed(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(OauthError::Malformed("empty access_token".to_string()));
        }

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        Ok(CachedToken {
            value: SecretString::from(token.access_token),
            expires_at: Instant::now() + lifetime,
        })
    }
}
