use std::borrow::Cow;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Per-input sync metrics, registered under the host registry with the
/// input ID as a label.
#[derive(Clone)]
pub(crate) struct Metrics {
    pub full_sync_total: Counter,
    pub full_sync_success: Counter,
    pub full_sync_failure: Counter,
    pub incremental_update_total: Counter,
    pub incremental_update_success: Counter,
    pub incremental_update_failure: Counter,
    pub users_api_calls: Counter,
    pub groups_api_calls: Counter,
}

impl Metrics {
    pub fn new(registry: &mut Registry, id: &str) -> Self {
        let sub = registry.sub_registry_with_prefix("identity");
        let sub =
            sub.sub_registry_with_label((Cow::Borrowed("input"), Cow::Owned(id.to_owned())));

        let full_sync_total = Counter::default();
        sub.register(
            "full_sync",
            "Full synchronization cycles run",
            full_sync_total.clone(),
        );
        let full_sync_success = Counter::default();
        sub.register(
            "full_sync_success",
            "Full synchronization cycles that succeeded",
            full_sync_success.clone(),
        );
        let full_sync_failure = Counter::default();
        sub.register(
            "full_sync_failure",
            "Full synchronization cycles that failed",
            full_sync_failure.clone(),
        );

        let incremental_update_total = Counter::default();
        sub.register(
            "incremental_update",
            "Incremental update cycles run",
            incremental_update_total.clone(),
        );
        let incremental_update_success = Counter::default();
        sub.register(
            "incremental_update_success",
            "Incremental update cycles that succeeded",
            incremental_update_success.clone(),
        );
        let incremental_update_failure = Counter::default();
        sub.register(
            "incremental_update_failure",
            "Incremental update cycles that failed",
            incremental_update_failure.clone(),
        );

        let users_api_calls = Counter::default();
        sub.register(
            "users_api_calls",
            "Calls made to the users delta API",
            users_api_calls.clone(),
        );
        let groups_api_calls = Counter::default();
        sub.register(
            "groups_api_calls",
            "Calls made to the groups delta API",
            groups_api_calls.clone(),
        );

        Self {
            full_sync_total,
            full_sync_success,
            full_sync_failure,
            incremental_update_total,
            incremental_update_success,
            incremental_update_failure,
            users_api_calls,
            groups_api_calls,
        }
    }
}
