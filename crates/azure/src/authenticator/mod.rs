//! Bearer-token acquisition for the Graph API.

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod oauth2;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("auth token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token request returned unexpected status code: {status} body: {body}")]
    Status { status: u16, body: String },

    #[error("unable to decode token response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("authentication unavailable: {0}")]
    Unavailable(String),
}

/// Supplies a valid bearer token on demand.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}
