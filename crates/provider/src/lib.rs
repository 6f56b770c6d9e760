//! Identity provider abstraction for the synchronization input.
//!
//! A provider owns the full lifecycle of one identity source: connectivity
//! testing and the long-running sync loop. Implementations register a named
//! factory into the process-wide [`registry`] at startup (see
//! [`register_identity_provider!`]); the host dispatches to a provider by
//! name when constructing an [`Input`].

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result as EyreResult;
use tokio_util::sync::CancellationToken;

use idsync_kvstore::{EventSink, Store};

mod input;
pub mod registry;

pub use input::{Input, InputConfig};
pub use registry::{FactoryFn, RegistryError};

/// Per-run context handed to a provider.
#[derive(Clone)]
pub struct RunContext {
    /// The configured input ID; names the KV store file and the metrics
    /// registry entry, and is stamped on emitted events.
    pub id: String,

    /// Cancellation of the whole input. Fatal to the current cycle and, at
    /// top level, to the run loop.
    pub cancel: CancellationToken,
}

/// A named identity provider.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validates connectivity to the identity source without mutating any
    /// state.
    async fn test(&self, ctx: &RunContext) -> EyreResult<()>;

    /// Runs the provider's sync loop until `ctx.cancel` fires.
    async fn run(
        &self,
        ctx: RunContext,
        store: Store,
        sink: Arc<dyn EventSink>,
    ) -> EyreResult<()>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Provider").field(&self.name()).finish()
    }
}

/// Renders a caught panic payload for logging and error reporting.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Registers a provider factory under `$name` during program
/// initialization, the way plugin inputs announce themselves to the host.
#[macro_export]
macro_rules! register_identity_provider {
    ($name:expr, $factory:expr) => {
        #[ctor::ctor]
        fn register_this_provider() {
            if let Err(err) = $crate::registry::register($name, $factory) {
                panic!("unable to register identity provider {:?}: {err}", $name);
            }
        }
    };
}
