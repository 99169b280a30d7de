//! Configuration types for consul-catalog.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::acl::Networks;
use crate::error::CatalogError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Consul connection settings.
    #[serde(default)]
    pub consul: ConsulConfig,

    /// Synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// How to reach the Consul HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// `http` or `https`.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Agent address as `host:port`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// ACL token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            endpoint: default_endpoint(),
            token: None,
        }
    }
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_endpoint() -> String {
    "127.0.0.1:8500".to_string()
}

/// Which services get published, and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// KV path holding the JSON document of static entries.
    #[serde(default = "default_config_key")]
    pub config_key: String,

    /// Service used as target for proxied services.
    #[serde(default)]
    pub proxy_service: Option<String>,

    /// Tag a catalog service must carry to be published.
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Tag redirecting a service's target to the proxy service.
    #[serde(default)]
    pub proxy_tag: Option<String>,

    /// Tag prefix declaring aliases, used as `<alias_tag>=a,b`.
    #[serde(default)]
    pub alias_tag: Option<String>,

    /// Tag disabling ACL enforcement for a service.
    #[serde(default)]
    pub acl_ignore_tag: Option<String>,

    /// Service metadata key holding ACL rules. ACLs are only parsed when set.
    #[serde(default)]
    pub acl_metadata_key: Option<String>,

    /// Named networks ACL rules may reference.
    #[serde(default)]
    pub networks: Networks,

    /// Maximum time a blocking query waits for a change, in seconds.
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,

    /// Delay before retrying a failed sync, in seconds.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_key: default_config_key(),
            proxy_service: None,
            tag: default_tag(),
            proxy_tag: None,
            alias_tag: None,
            acl_ignore_tag: None,
            acl_metadata_key: None,
            networks: Networks::default(),
            wait_time_secs: default_wait_time_secs(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Blocking query wait time.
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    /// Delay between failed sync attempts.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Reject settings the sync loops cannot work with.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.config_key.trim().is_empty() {
            return Err(CatalogError::Config("config_key must not be empty".into()));
        }
        if self.tag.trim().is_empty() {
            return Err(CatalogError::Config("tag must not be empty".into()));
        }
        // A zero wait turns the blocking query into a busy poll.
        if self.wait_time_secs == 0 {
            return Err(CatalogError::Config(
                "wait_time_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_key() -> String {
    "consul-catalog/config".to_string()
}

fn default_tag() -> String {
    "dns.enabled".to_string()
}

fn default_wait_time_secs() -> u64 {
    600
}

fn default_retry_interval_secs() -> u64 {
    5
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "consul_catalog=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
