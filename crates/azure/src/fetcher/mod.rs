//! Delta fetching from the identity source.

use async_trait::async_trait;
use thiserror::Error;

use crate::authenticator::AuthError;

pub mod graph;
mod group;
mod user;

pub use group::{Group, GroupEcs, Member, MemberType};
pub use user::{User, UserParseError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("unable to get bearer token: {0}")]
    Auth(#[from] AuthError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status code: {status} body: {body}")]
    Status { status: u16, body: String },

    #[error("unable to decode delta response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("encountered nextLink fetch infinite loop")]
    NextLinkLoop,

    #[error("encountered response without nextLink or deltaLink")]
    MissingLinks,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// Fetches user and group deltas.
///
/// Each call drains every page of the current delta and returns the
/// entities together with the new continuation link. Passing `None` starts
/// a fresh enumeration from the configured endpoint.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn users(&self, delta_link: Option<&str>) -> Result<(Vec<User>, String), FetchError>;

    async fn groups(&self, delta_link: Option<&str>) -> Result<(Vec<Group>, String), FetchError>;
}
