//! Process-wide registry of named identity provider factories.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use eyre::Result as EyreResult;
use lazy_static::lazy_static;
use prometheus_client::registry::Registry;
use serde_json::Value;
use thiserror::Error;

use crate::Provider;

/// Builds a configured provider from the input's raw configuration. The
/// factory registers its metrics under the supplied registry.
pub type FactoryFn = fn(config: &Value, metrics: &mut Registry) -> EyreResult<Arc<dyn Provider>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("provider already registered: {0}")]
    Exists(String),

    #[error("provider not found: {0}")]
    NotFound(String),
}

lazy_static! {
    static ref PROVIDERS: Mutex<HashMap<String, FactoryFn>> = Mutex::new(HashMap::new());
}

/// Registers `factory` under `name`. Registering the same name twice is an
/// error.
pub fn register(name: &str, factory: FactoryFn) -> Result<(), RegistryError> {
    let mut providers = PROVIDERS.lock().expect("provider registry poisoned");
    if providers.contains_key(name) {
        return Err(RegistryError::Exists(name.to_owned()));
    }

    let _ = providers.insert(name.to_owned(), factory);

    Ok(())
}

/// Looks up the factory registered under `name`.
pub fn get(name: &str) -> Result<FactoryFn, RegistryError> {
    PROVIDERS
        .lock()
        .expect("provider registry poisoned")
        .get(name)
        .copied()
        .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
}

pub fn has(name: &str) -> bool {
    PROVIDERS
        .lock()
        .expect("provider registry poisoned")
        .contains_key(name)
}

#[cfg(test)]
mod tests {
    use eyre::eyre;

    use super::*;

    fn failing_factory(_config: &Value, _metrics: &mut Registry) -> EyreResult<Arc<dyn Provider>> {
        Err(eyre!("test error"))
    }

    #[test]
    fn register_get_has() {
        register("test-registry", failing_factory).unwrap();

        let err = register("test-registry", failing_factory).unwrap_err();
        assert_eq!(err, RegistryError::Exists("test-registry".to_owned()));

        assert!(has("test-registry"));
        assert!(!has("no-such-provider"));

        let err = get("no-such-provider").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("no-such-provider".to_owned()));

        let factory = get("test-registry").unwrap();
        let mut metrics = Registry::default();
        let err = factory(&Value::Null, &mut metrics).unwrap_err();
        assert!(err.to_string().contains("test error"));
    }
}
