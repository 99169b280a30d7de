//! Long-running watch tasks driving the sync loops.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ConsulClient;
use crate::config::Config;
use crate::error::CatalogError;
use crate::state::{CatalogState, Source};
use crate::sync::{SyncOutcome, Syncer};

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit state metrics.
async fn metrics_loop(state: CatalogState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.emit_metrics();
                debug!(
                    services = state.services_count(),
                    static_entries = state.static_count(),
                    serial = state.serial(),
                    "emitted state metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Keeps a [`CatalogState`] in sync with Consul until cancelled.
pub struct CatalogWatcher {
    config: Config,
    state: CatalogState,
}

impl CatalogWatcher {
    /// Create a watcher with an empty state.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: CatalogState::new(),
        }
    }

    /// Get a handle to the state. Clones share the same snapshots.
    pub fn state(&self) -> &CatalogState {
        &self.state
    }

    /// Connect to Consul and run both watches until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CatalogError> {
        self.config.sync.validate()?;

        info!(
            scheme = %self.config.consul.scheme,
            endpoint = %self.config.consul.endpoint,
            config_key = %self.config.sync.config_key,
            tag = %self.config.sync.tag,
            networks = self.config.sync.networks.len(),
            "starting consul catalog watcher"
        );

        let client = Arc::new(ConsulClient::new(
            &self.config.consul,
            self.config.sync.wait_time(),
        )?);
        let syncer = Syncer::new(client.clone(), client, self.state, &self.config.sync);

        run_syncer(
            Arc::new(syncer),
            self.config.sync.retry_interval(),
            shutdown,
        )
        .await;
        Ok(())
    }
}

/// Run the config and catalog watches on their own tasks until `shutdown`
/// fires. Failed syncs are retried after `retry_interval`.
pub async fn run_syncer(
    syncer: Arc<Syncer>,
    retry_interval: Duration,
    shutdown: CancellationToken,
) {
    let config_handle = tokio::spawn(watch(
        syncer.clone(),
        Source::Config,
        retry_interval,
        shutdown.clone(),
    ));
    let catalog_handle = tokio::spawn(watch(
        syncer.clone(),
        Source::Catalog,
        retry_interval,
        shutdown.clone(),
    ));
    let metrics_handle = tokio::spawn(metrics_loop(syncer.state().clone(), shutdown.clone()));

    let (config_result, catalog_result) = tokio::join!(config_handle, catalog_handle);

    if let Err(e) = config_result {
        error!("Config watch task panicked: {}", e);
    }
    if let Err(e) = catalog_result {
        error!("Catalog watch task panicked: {}", e);
    }

    let _ = metrics_handle.await;
    info!("consul catalog watcher stopped");
}

/// Invoke one source's sync in an unconditional loop.
async fn watch(
    syncer: Arc<Syncer>,
    source: Source,
    retry_interval: Duration,
    shutdown: CancellationToken,
) {
    info!(%source, "starting watch");
    let mut announced_ready = false;

    loop {
        let result = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%source, "watch received shutdown signal");
                return;
            }

            result = sync_once(&syncer, source) => result,
        };

        match result {
            Ok(SyncOutcome::Applied { index, published }) => {
                debug!(%source, index, published, "applied change");
                if !announced_ready {
                    announced_ready = true;
                    info!(%source, published, "initial sync complete");
                }
            }
            Ok(SyncOutcome::Unchanged { .. }) => {}
            Err(error) => {
                warn!(%source, %error, retry_in = ?retry_interval, "sync failed");
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(%source, "watch received shutdown signal");
                        return;
                    }
                    _ = sleep(retry_interval) => {}
                }
            }
        }
    }
}

async fn sync_once(syncer: &Syncer, source: Source) -> Result<SyncOutcome, CatalogError> {
    match source {
        Source::Config => syncer.fetch_config().await,
        Source::Catalog => syncer.fetch_services().await,
    }
}
