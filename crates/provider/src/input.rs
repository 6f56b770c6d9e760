use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use eyre::{eyre, Result as EyreResult, WrapErr};
use futures_util::FutureExt;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use idsync_kvstore::{EventSink, Store};

use crate::{panic_message, registry, Provider, RunContext};

/// The host-facing slice of an input's configuration; everything else in the
/// raw value belongs to the dispatched provider.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub id: String,
    pub provider: String,
}

/// One configured identity input: a provider bound to an input ID and a
/// per-input KV store file.
#[derive(Debug)]
pub struct Input {
    id: String,
    provider: Arc<dyn Provider>,
}

impl Input {
    /// Constructs an input by dispatching to the named provider's factory
    /// with the full raw configuration.
    pub fn new(config: &Value, metrics: &mut Registry) -> EyreResult<Self> {
        let parsed: InputConfig = serde_json::from_value(config.clone())
            .wrap_err("unable to unpack identity input config")?;

        let factory = registry::get(&parsed.provider)
            .wrap_err_with(|| format!("unable to create {} input", parsed.id))?;
        let provider = factory(config, metrics)
            .wrap_err_with(|| format!("unable to create {} input provider", parsed.provider))?;

        Ok(Self {
            id: parsed.id,
            provider,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Runs the provider's connectivity test behind the panic boundary.
    pub async fn test(&self, cancel: CancellationToken) -> EyreResult<()> {
        let ctx = RunContext {
            id: self.id.clone(),
            cancel,
        };

        match AssertUnwindSafe(self.provider.test(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(eyre!(
                "input {} test panicked: {}",
                self.id,
                panic_message(&panic)
            )),
        }
    }

    /// Opens the input's store (`<id>.db` under `data_dir`) and runs the
    /// provider until cancellation. A panic anywhere inside the provider is
    /// converted into an input-level error rather than tearing down the
    /// host.
    pub async fn run(
        &self,
        data_dir: &Path,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
    ) -> EyreResult<()> {
        let store = Store::open(data_dir.join(format!("{}.db", self.id)))
            .wrap_err_with(|| format!("unable to open state store for input {}", self.id))?;

        let ctx = RunContext {
            id: self.id.clone(),
            cancel,
        };

        // Unwinding cannot leave the input in a broken state: an open store
        // transaction rolls back on drop.
        let result = AssertUnwindSafe(self.provider.run(ctx, store, sink))
            .catch_unwind()
            .await;

        match result {
            Ok(result) => {
                info!(id = %self.id, "identity input exiting");
                result
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(id = %self.id, panic = %message, "identity input panicked");
                Err(eyre!("input {} panicked: {message}", self.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use idsync_kvstore::Event;

    use super::*;

    struct NullSink;

    impl EventSink for NullSink {
        fn publish(&self, _event: Event) {}
    }

    struct PanickingProvider;

    #[async_trait]
    impl Provider for PanickingProvider {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn test(&self, _ctx: &RunContext) -> EyreResult<()> {
            panic!("test panic");
        }

        async fn run(
            &self,
            _ctx: RunContext,
            _store: Store,
            _sink: Arc<dyn EventSink>,
        ) -> EyreResult<()> {
            panic!("run panic");
        }
    }

    fn panicking_factory(
        _config: &Value,
        _metrics: &mut Registry,
    ) -> EyreResult<Arc<dyn Provider>> {
        Ok(Arc::new(PanickingProvider))
    }

    #[tokio::test]
    async fn unknown_provider_fails_construction() {
        let mut metrics = Registry::default();
        let err = Input::new(
            &json!({"id": "test-1", "provider": "no-such-provider"}),
            &mut metrics,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unable to create test-1 input"));
    }

    #[tokio::test]
    async fn provider_panics_become_input_errors() {
        registry::register("panicking", panicking_factory).unwrap();

        let mut metrics = Registry::default();
        let input = Input::new(
            &json!({"id": "test-2", "provider": "panicking"}),
            &mut metrics,
        )
        .unwrap();

        let err = input.test(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("test panicked"));
        assert!(err.to_string().contains("test panic"));

        let dir = TempDir::new().unwrap();
        let err = input
            .run(dir.path(), CancellationToken::new(), Arc::new(NullSink))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(err.to_string().contains("run panic"));
    }
}
