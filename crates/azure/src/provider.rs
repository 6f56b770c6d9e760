//! The Azure AD provider: the two-timer sync scheduler, the full and
//! incremental cycles, and per-user event publishing.

use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result as EyreResult, WrapErr};
use futures_util::FutureExt;
use prometheus_client::registry::Registry;
use serde_json::Value;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use idsync_kvstore::{Error as StoreError, Event, EventSink, Store, TxTracker};
use idsync_provider::{panic_message, InputConfig, Provider, RunContext};

use crate::authenticator::oauth2::OAuth2Authenticator;
use crate::authenticator::Authenticator;
use crate::config::AzureConfig;
use crate::events;
use crate::fetcher::graph::GraphFetcher;
use crate::fetcher::{Fetcher, Group, User};
use crate::metrics::Metrics;
use crate::state::{self, StateStore};
use crate::sync::{self, DeltaBatch};
use crate::{FULL_NAME, NAME};

pub struct AzureProvider {
    conf: AzureConfig,
    auth: Arc<dyn Authenticator>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Metrics,
}

impl AzureProvider {
    pub(crate) fn new(
        conf: AzureConfig,
        auth: Arc<dyn Authenticator>,
        fetcher: Arc<dyn Fetcher>,
        metrics: Metrics,
    ) -> Self {
        Self {
            conf,
            auth,
            fetcher,
            metrics,
        }
    }

    /// The registry factory: builds a fully wired provider from the raw
    /// input configuration.
    pub fn from_config(config: &Value, registry: &mut Registry) -> EyreResult<Arc<dyn Provider>> {
        let input: InputConfig = serde_json::from_value(config.clone())
            .wrap_err("unable to unpack identity input config")?;
        let conf: AzureConfig = serde_json::from_value(config.clone())
            .wrap_err_with(|| format!("unable to unpack {NAME} input config"))?;
        conf.validate()
            .wrap_err_with(|| format!("invalid {NAME} input config"))?;

        let client = conf.http_client().wrap_err("unable to create HTTP client")?;
        let auth: Arc<dyn Authenticator> =
            Arc::new(OAuth2Authenticator::new(&conf, client.clone()));
        let fetcher = GraphFetcher::new(&conf, Arc::clone(&auth), client)
            .wrap_err("unable to create fetcher")?;
        let metrics = Metrics::new(registry, &input.id);

        Ok(Arc::new(Self::new(conf, auth, Arc::new(fetcher), metrics)))
    }

    /// Converts a panicking cycle into a cycle-level error so a bad page or
    /// a bug in a dependency never kills the run loop.
    async fn guarded<F>(&self, cycle: F) -> EyreResult<()>
    where
        F: Future<Output = EyreResult<()>>,
    {
        match AssertUnwindSafe(cycle).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(eyre!("sync cycle panicked: {}", panic_message(&panic))),
        }
    }

    async fn run_full_sync(
        &self,
        ctx: &RunContext,
        store: &Store,
        sink: &Arc<dyn EventSink>,
    ) -> EyreResult<()> {
        info!(tenant_id = %self.conf.tenant_id, "running full synchronization");

        debug!("opening state store transaction");
        let mut state = StateStore::open(store)
            .await
            .wrap_err("unable to begin transaction")?;
        debug!("transaction opened");

        let _ = self.fetch_delta(&mut state).await?;

        if !state.users.is_empty() {
            let tracker = Arc::new(TxTracker::new(&ctx.cancel));
            for user in state.users.values() {
                self.publish_user(user, &state.groups, &ctx.id, sink, &tracker);
            }
            tracker.wait().await;

            if ctx.cancel.is_cancelled() {
                state.close(false)?;
                return Err(eyre!("cancelled while awaiting event delivery"));
            }
        }

        state.last_sync = Some(Utc::now());
        state.close(true)
    }

    async fn run_incremental_update(
        &self,
        ctx: &RunContext,
        store: &Store,
        sink: &Arc<dyn EventSink>,
    ) -> EyreResult<()> {
        info!(tenant_id = %self.conf.tenant_id, "running incremental update");

        let mut state = StateStore::open(store)
            .await
            .wrap_err("unable to begin transaction")?;

        let affected = self.fetch_delta(&mut state).await?;

        if !affected.is_empty() {
            let tracker = Arc::new(TxTracker::new(&ctx.cancel));
            for user_id in &affected {
                match state.users.get(user_id) {
                    None => warn!(user = %user_id, "unable to lookup user"),
                    Some(user) => {
                        self.publish_user(user, &state.groups, &ctx.id, sink, &tracker);
                    }
                }
            }
            tracker.wait().await;

            if ctx.cancel.is_cancelled() {
                state.close(false)?;
                return Err(eyre!("cancelled while awaiting event delivery"));
            }
        }

        state.last_update = Some(Utc::now());
        state.close(true)
    }

    /// Drains both delta streams, reconciles them into the snapshot, and
    /// returns the affected user set.
    async fn fetch_delta(&self, state: &mut StateStore) -> EyreResult<HashSet<Uuid>> {
        let (users, users_link) = self.fetcher.users(state.users_link.as_deref()).await?;
        let _ = self.metrics.users_api_calls.inc();
        debug!(count = users.len(), "got users from API");

        let (groups, groups_link) = self.fetcher.groups(state.groups_link.as_deref()).await?;
        let _ = self.metrics.groups_api_calls.inc();
        debug!(count = groups.len(), "got groups from API");

        Ok(sync::reconcile(
            state,
            DeltaBatch {
                users,
                groups,
                users_link,
                groups_link,
            },
        ))
    }

    fn publish_user(
        &self,
        user: &User,
        groups: &HashMap<Uuid, Group>,
        input_id: &str,
        sink: &Arc<dyn EventSink>,
        tracker: &Arc<TxTracker>,
    ) {
        let doc = events::user_event(user, groups, input_id);

        tracker.add();
        sink.publish(Event::with_tracker(doc, Arc::clone(tracker)));
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn name(&self) -> &'static str {
        FULL_NAME
    }

    async fn test(&self, _ctx: &RunContext) -> EyreResult<()> {
        let _ = self
            .auth
            .token()
            .await
            .wrap_err_with(|| format!("{NAME} test failed"))?;

        Ok(())
    }

    async fn run(
        &self,
        ctx: RunContext,
        store: Store,
        sink: Arc<dyn EventSink>,
    ) -> EyreResult<()> {
        let last_sync = state::last_sync_time(&store).await.ok().flatten();
        let last_update = state::last_update_time(&store).await.ok().flatten();

        let sync_wait = compute_wait(last_sync, self.conf.sync_interval);
        let mut update_wait = compute_wait(last_update, self.conf.update_interval);

        // Until an initial full sync has happened there is nothing to
        // update incrementally; queue the update a whole interval out.
        if last_sync.is_none() {
            update_wait = self.conf.update_interval;
        }

        debug!(
            tenant_id = %self.conf.tenant_id,
            ?sync_wait,
            ?update_wait,
            "initial timer waits"
        );

        let sync_timer = time::sleep(sync_wait);
        tokio::pin!(sync_timer);
        let update_timer = time::sleep(update_wait);
        tokio::pin!(update_timer);

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancel.cancelled() => return Ok(()),

                _ = sync_timer.as_mut() => {
                    match self.guarded(self.run_full_sync(&ctx, &store, &sink)).await {
                        Ok(()) => {
                            let _ = self.metrics.full_sync_success.inc();
                        }
                        Err(err) => {
                            error!(tenant_id = %self.conf.tenant_id, error = %err, "error running full sync");
                            let _ = self.metrics.full_sync_failure.inc();
                            let _ = self.metrics.full_sync_total.inc();
                            if is_state_corruption(&err) {
                                // Retrying cannot recover a snapshot that no
                                // longer decodes; an operator has to step in.
                                return Err(err);
                            }
                            sync_timer.as_mut().reset(Instant::now() + self.conf.sync_interval);
                            update_timer.as_mut().reset(Instant::now() + self.conf.sync_interval);
                            continue;
                        }
                    }
                    let _ = self.metrics.full_sync_total.inc();

                    // Re-arm both timers a full sync interval out, so no
                    // incremental update runs close behind a full sync.
                    sync_timer.as_mut().reset(Instant::now() + self.conf.sync_interval);
                    update_timer.as_mut().reset(Instant::now() + self.conf.sync_interval);
                }

                _ = update_timer.as_mut() => {
                    match self.guarded(self.run_incremental_update(&ctx, &store, &sink)).await {
                        Ok(()) => {
                            let _ = self.metrics.incremental_update_success.inc();
                        }
                        Err(err) => {
                            error!(tenant_id = %self.conf.tenant_id, error = %err, "error running incremental update");
                            let _ = self.metrics.incremental_update_failure.inc();
                            let _ = self.metrics.incremental_update_total.inc();
                            if is_state_corruption(&err) {
                                return Err(err);
                            }
                            update_timer.as_mut().reset(Instant::now() + self.conf.update_interval);
                            continue;
                        }
                    }
                    let _ = self.metrics.incremental_update_total.inc();

                    update_timer.as_mut().reset(Instant::now() + self.conf.update_interval);
                }
            }
        }
    }
}

/// A snapshot that no longer decodes is corrupt; only a load-side decode
/// failure qualifies. Fetch-side decode failures are protocol errors and
/// stay transient.
fn is_state_corruption(err: &eyre::Report) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::Decode(_))))
}

/// How long to wait before the next run: zero when a run has never
/// happened, else the remainder of the interval measured from `last`.
fn compute_wait(last: Option<DateTime<Utc>>, interval: Duration) -> Duration {
    let Some(last) = last else {
        return Duration::ZERO;
    };

    let elapsed = Utc::now()
        .signed_duration_since(last)
        .to_std()
        .unwrap_or(Duration::ZERO);

    interval.saturating_sub(elapsed)
}
