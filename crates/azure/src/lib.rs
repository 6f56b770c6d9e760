//! Azure Active Directory identity provider.
//!
//! Periodically pulls user and group deltas from the Microsoft Graph API,
//! reconciles them against the snapshot persisted in the input's KV store,
//! expands transitive group memberships over the group relationship graph,
//! and publishes one enriched event per affected user.

use idsync_provider::register_identity_provider;

pub mod authenticator;
pub mod config;
mod events;
pub mod fetcher;
mod metrics;
pub mod provider;
mod state;
mod sync;

pub use config::AzureConfig;
pub use provider::AzureProvider;

/// The provider name used for registry dispatch.
pub const NAME: &str = "azure";

/// The fully-qualified input name reported to the host.
pub const FULL_NAME: &str = "identity-azure";

register_identity_provider!(NAME, provider::AzureProvider::from_config);
