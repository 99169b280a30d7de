//! Blocking-query sync for the KV config document and the service catalog.
//!
//! Each call to [`Syncer::fetch_config`] or [`Syncer::fetch_services`] issues
//! one blocking query with the last index seen for that source. When the
//! index changed, the full snapshot for that source is rebuilt off-lock and
//! published to [`CatalogState`] in one step. Callers are expected to invoke
//! them in a loop; see [`crate::watcher`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{CatalogClient, KvClient, QueryOptions};
use crate::config::SyncConfig;
use crate::error::{CatalogError, SkipReason};
use crate::metrics::{self, SyncResult, Timer};
use crate::service::{KvEntry, Service, ServiceBuilder};
use crate::state::{CatalogState, ServiceMap, Source};

/// Result of a successful sync invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The query returned without a new index; nothing was published.
    Unchanged {
        /// Index that remains current.
        index: u64,
    },
    /// A new snapshot was published.
    Applied {
        /// Index stored with the snapshot.
        index: u64,
        /// Number of published names.
        published: usize,
    },
}

/// Drives blocking queries against the registry and KV store.
pub struct Syncer {
    catalog: Arc<dyn CatalogClient>,
    kv: Arc<dyn KvClient>,
    state: CatalogState,
    builder: ServiceBuilder,
    config_key: String,
    wait_time: Duration,
}

impl Syncer {
    /// Create a syncer publishing into `state`.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        kv: Arc<dyn KvClient>,
        state: CatalogState,
        config: &SyncConfig,
    ) -> Self {
        Self {
            catalog,
            kv,
            state,
            builder: ServiceBuilder::new(config),
            config_key: config.config_key.clone(),
            wait_time: config.wait_time(),
        }
    }

    /// State this syncer publishes into.
    pub fn state(&self) -> &CatalogState {
        &self.state
    }

    /// Wait for a change to the KV config document and publish it.
    pub async fn fetch_config(&self) -> Result<SyncOutcome, CatalogError> {
        let timer = Timer::start();
        let result = self.sync_config().await;
        metrics::record_sync(Source::Config, sync_result(&result), timer.elapsed());
        result
    }

    /// Wait for a change to the service catalog and publish it.
    pub async fn fetch_services(&self) -> Result<SyncOutcome, CatalogError> {
        let timer = Timer::start();
        let result = self.sync_services().await;
        metrics::record_sync(Source::Catalog, sync_result(&result), timer.elapsed());
        result
    }

    fn blocking_options(&self, index: u64) -> QueryOptions {
        QueryOptions {
            wait_time: Some(self.wait_time),
            wait_index: index,
        }
    }

    async fn sync_config(&self) -> Result<SyncOutcome, CatalogError> {
        let last_index = self.state.config_index();
        let (pair, meta) = self
            .kv
            .get(&self.config_key, &self.blocking_options(last_index))
            .await?;

        let Some(index) = next_index(Source::Config, last_index, meta.last_index) else {
            debug!(index = last_index, "no config changes");
            return Ok(SyncOutcome::Unchanged { index: last_index });
        };

        let pair = pair.ok_or_else(|| CatalogError::MissingConfig(self.config_key.clone()))?;
        debug!(key = %pair.key, bytes = pair.value.len(), "found config document");

        let entries: HashMap<String, serde_json::Value> = serde_json::from_slice(&pair.value)?;

        let mut snapshot = ServiceMap::with_capacity(entries.len());
        for (name, value) in entries {
            let built = KvEntry::from_value(value)
                .and_then(|entry| self.builder.build_static(&name, &entry));
            match built {
                Ok(service) => {
                    snapshot.insert(name, Arc::new(service));
                }
                Err(reason) => log_skip(Source::Config, &name, &reason),
            }
        }

        let published = snapshot.len();
        info!(
            entries = published,
            names = %sorted_names(&snapshot),
            index,
            "serving records for kv entries"
        );
        self.state.publish(Source::Config, snapshot, index);

        Ok(SyncOutcome::Applied { index, published })
    }

    async fn sync_services(&self) -> Result<SyncOutcome, CatalogError> {
        let last_index = self.state.catalog_index();
        let (listing, meta) = self
            .catalog
            .services(&self.blocking_options(last_index))
            .await?;

        let Some(index) = next_index(Source::Catalog, last_index, meta.last_index) else {
            debug!(index = last_index, "no catalog changes");
            return Ok(SyncOutcome::Unchanged { index: last_index });
        };

        debug!(count = listing.len(), "found catalog services");

        // Sorted so alias conflicts resolve the same way on every refresh.
        let mut names: Vec<&String> = listing.keys().collect();
        names.sort();

        let mut built: Vec<(Arc<Service>, Vec<String>)> = Vec::new();
        for name in names {
            let tags = self.builder.tag_names().classify(listing[name].as_slice());
            if !tags.exposed {
                log_skip(Source::Catalog, name, &SkipReason::NotExposed);
                continue;
            }

            let instances = match self.catalog.service(name, &QueryOptions::default()).await {
                Ok(instances) => instances,
                Err(error) => {
                    debug!(service = %name, %error, "failed to fetch service info");
                    metrics::record_skipped(Source::Catalog, &SkipReason::HydrationFailed);
                    continue;
                }
            };

            match self.builder.build_catalog(name, &tags, &instances) {
                Ok(service) => built.push((Arc::new(service), tags.aliases)),
                Err(reason) => log_skip(Source::Catalog, name, &reason),
            }
        }

        let snapshot = index_services(built);
        let published = snapshot.len();
        info!(
            names = published,
            services = %sorted_names(&snapshot),
            index,
            "serving records for catalog services"
        );
        self.state.publish(Source::Catalog, snapshot, index);

        Ok(SyncOutcome::Applied { index, published })
    }
}

/// Decide which index to store after a query.
///
/// Returns `None` when nothing changed. An index that went backwards means
/// the backend was reset; it is replaced with 0 so the next query fetches
/// the full state again.
fn next_index(source: Source, last: u64, returned: u64) -> Option<u64> {
    let next = if returned < last {
        debug!(%source, last, returned, "resetting watch index");
        metrics::record_index_reset(source);
        0
    } else {
        returned
    };

    (next != last).then_some(next)
}

/// Key services by canonical name, then by alias.
///
/// Canonical names always win; an alias colliding with an earlier alias or a
/// canonical name is dropped.
fn index_services(built: Vec<(Arc<Service>, Vec<String>)>) -> ServiceMap {
    let mut snapshot: ServiceMap = built
        .iter()
        .map(|(service, _)| (service.name.clone(), service.clone()))
        .collect();

    for (service, aliases) in built {
        for alias in aliases {
            if let Some(existing) = snapshot.get(&alias) {
                if !Arc::ptr_eq(existing, &service) {
                    warn!(
                        service = %service.name,
                        %alias,
                        taken_by = %existing.name,
                        "ignoring conflicting alias"
                    );
                }
                continue;
            }
            debug!(service = %service.name, %alias, "adding alias");
            snapshot.insert(alias, service.clone());
        }
    }

    snapshot
}

fn log_skip(source: Source, name: &str, reason: &SkipReason) {
    match reason {
        SkipReason::NotExposed => {
            debug!(%source, service = %name, "not tagged for exposure, skipping")
        }
        _ => warn!(%source, service = %name, %reason, "ignoring service"),
    }
    metrics::record_skipped(source, reason);
}

fn sorted_names(snapshot: &ServiceMap) -> String {
    let mut names: Vec<&str> = snapshot.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(",")
}

fn sync_result(result: &Result<SyncOutcome, CatalogError>) -> SyncResult {
    match result {
        Ok(SyncOutcome::Applied { .. }) => SyncResult::Applied,
        Ok(SyncOutcome::Unchanged { .. }) => SyncResult::Unchanged,
        Err(_) => SyncResult::Error,
    }
}
