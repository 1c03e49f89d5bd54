//! OAuth2 refresh-token flow with an in-process access-token cache.
//!
//! The refresh token is long-lived configuration; access tokens are
//! exchanged on demand and reused until shortly before expiry.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CalendarError, Result};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this many seconds before the reported expiry.
const EXPIRY_MARGIN_SECS: u64 = 60;

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct TokenProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        client: reqwest::Client,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            refresh_token,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid access token, refreshing if absent or near expiry.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("refreshing calendar access token");
        let resp = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::AuthFailed(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CalendarError::Parse(e.to_string()))?;

        let lifetime = token.expires_in.saturating_sub(EXPIRY_MARGIN_SECS);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });

        Ok(token.access_token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}
