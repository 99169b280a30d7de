//! In-memory catalog state refreshed by the sync loops.
//!
//! Holds two independent snapshots:
//! - static entries from the KV config document
//! - services from the Consul catalog, keyed by name and alias
//!
//! Each snapshot is replaced wholesale on change, so a reader holding a
//! previously returned map keeps a consistent (if stale) view.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::metrics;
use crate::service::Service;

/// Published name -> service.
pub type ServiceMap = HashMap<String, Arc<Service>>;

/// Upstream a snapshot comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// The KV config document.
    Config,
    /// The service catalog.
    Catalog,
}

impl Source {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Config => "config",
            Source::Catalog => "catalog",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe catalog state.
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    inner: Arc<RwLock<CatalogStateInner>>,
}

#[derive(Debug, Default)]
struct CatalogStateInner {
    /// Entries from the KV document.
    static_entries: Arc<ServiceMap>,

    /// Catalog services, including aliases.
    services: Arc<ServiceMap>,

    last_config_index: u64,

    last_catalog_index: u64,

    /// Time of the last applied change from either source.
    last_update: Option<Instant>,

    /// Incremented on every applied change.
    serial: u32,

    /// True after the first successful fetch of either source.
    ready: bool,
}

impl CatalogState {
    /// Create an empty, not-ready state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current catalog-sourced snapshot.
    pub fn services(&self) -> Arc<ServiceMap> {
        self.inner.read().services.clone()
    }

    /// Current KV-sourced snapshot.
    pub fn static_entries(&self) -> Arc<ServiceMap> {
        self.inner.read().static_entries.clone()
    }

    /// Look up a published name. Catalog services win over static entries.
    pub fn service_for(&self, name: &str) -> Option<Arc<Service>> {
        let inner = self.inner.read();
        inner
            .services
            .get(name)
            .or_else(|| inner.static_entries.get(name))
            .cloned()
    }

    /// Time of the last applied change, `None` before the first one.
    pub fn last_updated(&self) -> Option<Instant> {
        self.inner.read().last_update
    }

    /// True once either source has been fetched successfully.
    pub fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    /// Change counter across both sources.
    pub fn serial(&self) -> u32 {
        self.inner.read().serial
    }

    /// Last index seen for a source.
    pub fn index(&self, source: Source) -> u64 {
        let inner = self.inner.read();
        match source {
            Source::Config => inner.last_config_index,
            Source::Catalog => inner.last_catalog_index,
        }
    }

    /// Last index seen for the KV document.
    pub fn config_index(&self) -> u64 {
        self.index(Source::Config)
    }

    /// Last index seen for the catalog.
    pub fn catalog_index(&self) -> u64 {
        self.index(Source::Catalog)
    }

    /// Number of published catalog names (aliases included).
    pub fn services_count(&self) -> usize {
        self.inner.read().services.len()
    }

    /// Number of static entries.
    pub fn static_count(&self) -> usize {
        self.inner.read().static_entries.len()
    }

    /// Install a new snapshot for a source.
    ///
    /// Map, index, readiness, serial and timestamp change under one write
    /// lock.
    pub fn publish(&self, source: Source, snapshot: ServiceMap, index: u64) {
        let snapshot = Arc::new(snapshot);
        let mut inner = self.inner.write();
        let entries = snapshot.len();
        match source {
            Source::Config => {
                inner.static_entries = snapshot;
                inner.last_config_index = index;
            }
            Source::Catalog => {
                inner.services = snapshot;
                inner.last_catalog_index = index;
            }
        }
        inner.ready = true;
        inner.last_update = Some(Instant::now());
        inner.serial = inner.serial.wrapping_add(1);
        debug!(
            %source,
            index,
            entries,
            serial = inner.serial,
            "published snapshot"
        );
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        metrics::record_state_counts(inner.services.len(), inner.static_entries.len());
        metrics::record_ready_state(inner.ready);
        metrics::record_serial(inner.serial);
    }
}
