use core::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The default incremental update interval.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// The default full synchronization interval.
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_LOGIN_SCOPE: &str = "https://graph.microsoft.com/.default";
const DEFAULT_API_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sync_interval_ms must be no shorter than update_interval_ms")]
    IntervalOrder,
}

/// Parameters needed to configure the Azure AD input. Unknown keys in the
/// raw input configuration (`id`, `provider`, ...) belong to the host and
/// are ignored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub secret: String,

    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_login_scopes")]
    pub login_scopes: Vec<String>,
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    #[serde(
        rename = "sync_interval_ms",
        default = "default_sync_interval",
        with = "serde_duration"
    )]
    pub sync_interval: Duration,
    #[serde(
        rename = "update_interval_ms",
        default = "default_update_interval",
        with = "serde_duration"
    )]
    pub update_interval: Duration,

    /// Optional HTTP request timeout, passed through to the transport.
    #[serde(rename = "request_timeout_ms", default, with = "serde_opt_duration")]
    pub request_timeout: Option<Duration>,
}

impl AzureConfig {
    /// Runs validation against the config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval < self.update_interval {
            return Err(ConfigError::IntervalOrder);
        }

        Ok(())
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        builder.build()
    }
}

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_owned()
}

fn default_login_scopes() -> Vec<String> {
    vec![DEFAULT_LOGIN_SCOPE.to_owned()]
}

fn default_api_endpoint() -> String {
    DEFAULT_API_ENDPOINT.to_owned()
}

const fn default_sync_interval() -> Duration {
    DEFAULT_SYNC_INTERVAL
}

const fn default_update_interval() -> Duration {
    DEFAULT_UPDATE_INTERVAL
}

mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod serde_opt_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn minimal() -> serde_json::Value {
        json!({
            "tenant_id": "tenant-1",
            "client_id": "client-1",
            "secret": "value",
        })
    }

    #[test]
    fn defaults_are_applied() {
        let conf: AzureConfig = serde_json::from_value(minimal()).unwrap();

        assert_eq!(conf.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(conf.login_scopes, vec![DEFAULT_LOGIN_SCOPE.to_owned()]);
        assert_eq!(conf.api_endpoint, DEFAULT_API_ENDPOINT);
        assert_eq!(conf.sync_interval, DEFAULT_SYNC_INTERVAL);
        assert_eq!(conf.update_interval, DEFAULT_UPDATE_INTERVAL);
        assert_eq!(conf.request_timeout, None);
        conf.validate().unwrap();
    }

    #[test]
    fn intervals_parse_from_millis() {
        let mut raw = minimal();
        raw["sync_interval_ms"] = json!(3_600_000);
        raw["update_interval_ms"] = json!(60_000);
        raw["request_timeout_ms"] = json!(5_000);

        let conf: AzureConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(conf.sync_interval, Duration::from_secs(3600));
        assert_eq!(conf.update_interval, Duration::from_secs(60));
        assert_eq!(conf.request_timeout, Some(Duration::from_secs(5)));
        conf.validate().unwrap();
    }

    #[test]
    fn sync_interval_must_cover_update_interval() {
        let mut raw = minimal();
        raw["sync_interval_ms"] = json!(60_000);
        raw["update_interval_ms"] = json!(3_600_000);

        let conf: AzureConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(conf.validate(), Err(ConfigError::IntervalOrder));
    }

    #[test]
    fn missing_required_field_fails() {
        let raw = json!({"tenant_id": "tenant-1"});
        assert!(serde_json::from_value::<AzureConfig>(raw).is_err());
    }
}
