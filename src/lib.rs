//! Consul Catalog - a DNS-facing snapshot of Consul services and ACLs.
//!
//! This crate keeps an in-memory view of which services should be published
//! as DNS names, which target each name points to, and which networks may
//! query it. The view is kept current with Consul blocking queries against
//! two sources: the service catalog and a single KV key holding a JSON
//! document of static entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        consul-catalog                           │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │ Consul client    │───▶│  Syncer          │                  │
//! │  │ (blocking query) │    │  (per source)    │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │                                   │ ServiceBuilder + ACL parser │
//! │                                   ▼                             │
//! │                          ┌──────────────────┐                  │
//! │                          │  CatalogState    │◀── readers       │
//! │                          │  (snapshots)     │    (DNS answers) │
//! │                          └──────────────────┘                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Publishing rules
//!
//! - KV entries are published as-is; `@service_proxy` targets resolve to the
//!   configured proxy service.
//! - Catalog services need the exposure tag. The proxy tag points them at the
//!   proxy service, `<alias_tag>=a,b` publishes extra names, and the
//!   ACL-ignore tag disables ACL enforcement.
//! - ACLs are `action network[, network...]` clauses separated by `;`, with
//!   names resolved against the configured networks.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use consul_catalog::{CatalogWatcher, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!     let watcher = CatalogWatcher::new(config);
//!     let state = watcher.state().clone();
//!
//!     let shutdown = CancellationToken::new();
//!     tokio::spawn(watcher.run(shutdown.clone()));
//!
//!     if let Some(service) = state.service_for("grafana") {
//!         println!("{} -> {}", service.name, service.target);
//!     }
//! }
//! ```

#![warn(missing_docs)]

pub mod acl;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod watcher;

// Re-export main types
pub use acl::{AclRule, Networks};
pub use client::{CatalogClient, ConsulClient, KvClient};
pub use config::{Config, ConsulConfig, SyncConfig, TelemetryConfig};
pub use error::{AclError, CatalogError, ClientError, SkipReason};
pub use service::Service;
pub use state::{CatalogState, ServiceMap};
pub use sync::{SyncOutcome, Syncer};
pub use watcher::CatalogWatcher;
