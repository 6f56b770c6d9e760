//! OAuth2 client-credentials authenticator.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::AzureConfig;

use super::{AuthError, Authenticator};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    bearer: String,
    expires_at: DateTime<Utc>,
}

/// Acquires bearer tokens from the tenant's token endpoint and caches them
/// until expiry.
pub struct OAuth2Authenticator {
    token_url: String,
    client_id: String,
    secret: String,
    scope: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuth2Authenticator {
    pub fn new(conf: &AzureConfig, client: reqwest::Client) -> Self {
        Self {
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                conf.login_url.trim_end_matches('/'),
                conf.tenant_id
            ),
            client_id: conf.client_id.clone(),
            secret: conf.secret.clone(),
            scope: conf.login_scopes.join(" "),
            client,
            cached: Mutex::new(None),
        }
    }

    async fn renew(&self) -> Result<CachedToken, AuthError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("scope", self.scope.as_str()),
            ("client_secret", self.secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(AuthError::Decode)?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        debug!(%expires_at, "renewed bearer token");

        Ok(CachedToken {
            bearer: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl Authenticator for OAuth2Authenticator {
    async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                debug!("retrieving cached token");
                return Ok(token.bearer.clone());
            }
            debug!("existing token has expired, renewing token");
        }

        let fresh = self.renew().await?;
        let bearer = fresh.bearer.clone();
        *cached = Some(fresh);

        Ok(bearer)
    }
}
