//! Shared test infrastructure: in-memory Consul catalog and KV fakes.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use consul_catalog::client::{
    CatalogClient, CatalogService, KvClient, KvPair, QueryMeta, QueryOptions,
};
use consul_catalog::{CatalogState, ClientError, Networks, SyncConfig, Syncer};

// --- Constants ---

pub const ENABLED_TAG: &str = "dns.enabled";
pub const PROXY_TAG: &str = "traefik.enable=true";
pub const ALIAS_TAG: &str = "dns.alias";
pub const ACL_IGNORE_TAG: &str = "dns.acl-ignore";
pub const ACL_KEY: &str = "dns-acl";
pub const PROXY_SERVICE: &str = "traefik";
pub const CONFIG_KEY: &str = "dns/config";

/// How long a fake blocking query holds when nothing changed.
const FAKE_WAIT: Duration = Duration::from_millis(10);

// --- Config builders ---

pub fn test_networks() -> Networks {
    [
        ("private", "10.0.0.0/8"),
        ("guest", "192.168.1.0/24"),
        ("public", "0.0.0.0/0"),
    ]
    .into_iter()
    .map(|(name, cidr)| (name.to_string(), cidr.parse().unwrap()))
    .collect()
}

pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        config_key: CONFIG_KEY.to_string(),
        proxy_service: Some(PROXY_SERVICE.to_string()),
        tag: ENABLED_TAG.to_string(),
        proxy_tag: Some(PROXY_TAG.to_string()),
        alias_tag: Some(ALIAS_TAG.to_string()),
        acl_ignore_tag: Some(ACL_IGNORE_TAG.to_string()),
        acl_metadata_key: Some(ACL_KEY.to_string()),
        networks: test_networks(),
        wait_time_secs: 1,
        retry_interval_secs: 1,
    }
}

// --- Fake catalog ---

/// A service registered in the fake catalog.
#[derive(Debug, Clone, Default)]
pub struct FakeService {
    pub tags: Vec<String>,
    pub instances: Vec<CatalogService>,
}

impl FakeService {
    /// A service with the given tags and one instance per `(address, acl)`.
    pub fn new(tags: &[&str], instances: &[(&str, Option<&str>)]) -> Self {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let instances = instances
            .iter()
            .enumerate()
            .map(|(i, (address, acl))| {
                let mut meta = HashMap::new();
                if let Some(acl) = acl {
                    meta.insert(ACL_KEY.to_string(), acl.to_string());
                }
                CatalogService {
                    node: format!("node-{}", i),
                    address: address.to_string(),
                    service_tags: tags.clone(),
                    service_meta: meta,
                    ..Default::default()
                }
            })
            .collect();
        Self { tags, instances }
    }
}

#[derive(Debug, Default)]
struct FakeCatalogInner {
    services: BTreeMap<String, FakeService>,
    index: u64,
    fail: bool,
    unreachable: HashSet<String>,
    requested_indexes: Vec<u64>,
    hydrated: Vec<String>,
}

/// In-memory catalog. Every mutation bumps the change index.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    inner: Mutex<FakeCatalogInner>,
}

impl FakeCatalog {
    pub fn new(index: u64) -> Self {
        let catalog = Self::default();
        catalog.inner.lock().unwrap().index = index;
        catalog
    }

    /// The catalog used throughout the sync tests:
    /// - `nomad`: exposed, proxied, `allow private`
    /// - `nomad-client`: no tags
    /// - `traefik`: exposed, proxied, `allow private, guest; deny public`
    /// - `git`: exposed, two instances, `deny guest; allow public`
    pub fn standard() -> Self {
        let catalog = Self::new(4);
        catalog.insert(
            "nomad",
            FakeService::new(
                &[ENABLED_TAG, PROXY_TAG],
                &[("192.168.100.1", Some("allow private"))],
            ),
        );
        catalog.insert(
            "nomad-client",
            FakeService::new(&[], &[("192.168.100.1", None)]),
        );
        catalog.insert(
            "traefik",
            FakeService::new(
                &[ENABLED_TAG, PROXY_TAG],
                &[("192.168.100.2", Some("allow private, guest; deny public"))],
            ),
        );
        catalog.insert(
            "git",
            FakeService::new(
                &[ENABLED_TAG],
                &[
                    ("192.168.100.3", Some("deny guest; allow public")),
                    ("192.168.100.4", Some("deny guest; allow public")),
                ],
            ),
        );
        catalog.set_index(4);
        catalog
    }

    pub fn insert(&self, name: &str, service: FakeService) {
        let mut inner = self.inner.lock().unwrap();
        inner.services.insert(name.to_string(), service);
        inner.index += 1;
    }

    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.services.remove(name).is_some(), "unknown service {name}");
        inner.index += 1;
    }

    pub fn set_index(&self, index: u64) {
        self.inner.lock().unwrap().index = index;
    }

    pub fn set_failing(&self, fail: bool) {
        self.inner.lock().unwrap().fail = fail;
    }

    /// Make instance lookups for `name` fail.
    pub fn set_unreachable(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .unreachable
            .insert(name.to_string());
    }

    /// Wait indexes of every `services` call so far.
    pub fn requested_indexes(&self) -> Vec<u64> {
        self.inner.lock().unwrap().requested_indexes.clone()
    }

    /// Names passed to `service` so far, in call order.
    pub fn hydrated(&self) -> Vec<String> {
        self.inner.lock().unwrap().hydrated.clone()
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn service(
        &self,
        name: &str,
        _opts: &QueryOptions,
    ) -> Result<Vec<CatalogService>, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.hydrated.push(name.to_string());
        if inner.unreachable.contains(name) {
            return Err(ClientError::Status {
                status: 500,
                body: "rpc error".into(),
            });
        }
        inner
            .services
            .get(name)
            .map(|svc| svc.instances.clone())
            .ok_or_else(|| ClientError::NotFound(name.to_string()))
    }

    async fn services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(HashMap<String, Vec<String>>, QueryMeta), ClientError> {
        let unchanged = {
            let mut inner = self.inner.lock().unwrap();
            inner.requested_indexes.push(opts.wait_index);
            if inner.fail {
                return Err(ClientError::Status {
                    status: 503,
                    body: "no leader".into(),
                });
            }
            inner.index == opts.wait_index
        };

        if unchanged && opts.wait_time.is_some() {
            tokio::time::sleep(FAKE_WAIT).await;
        }

        let inner = self.inner.lock().unwrap();
        let listing = inner
            .services
            .iter()
            .map(|(name, svc)| (name.clone(), svc.tags.clone()))
            .collect();
        Ok((
            listing,
            QueryMeta {
                last_index: inner.index,
            },
        ))
    }
}

// --- Fake KV ---

#[derive(Debug, Default)]
struct FakeKvInner {
    value: Option<Vec<u8>>,
    index: u64,
    failures_left: usize,
    requested_indexes: Vec<u64>,
}

/// In-memory single-key KV store.
#[derive(Debug, Default)]
pub struct FakeKv {
    inner: Mutex<FakeKvInner>,
}

impl FakeKv {
    pub fn new(document: &str, index: u64) -> Self {
        let kv = Self::default();
        kv.set(document, index);
        kv
    }

    /// A store where the key does not exist.
    pub fn empty(index: u64) -> Self {
        let kv = Self::default();
        kv.inner.lock().unwrap().index = index;
        kv
    }

    pub fn set(&self, document: &str, index: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.value = Some(document.as_bytes().to_vec());
        inner.index = index;
    }

    /// Fail the next `count` requests.
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().unwrap().failures_left = count;
    }

    pub fn requested_indexes(&self) -> Vec<u64> {
        self.inner.lock().unwrap().requested_indexes.clone()
    }
}

#[async_trait]
impl KvClient for FakeKv {
    async fn get(
        &self,
        key: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), ClientError> {
        let unchanged = {
            let mut inner = self.inner.lock().unwrap();
            inner.requested_indexes.push(opts.wait_index);
            if inner.failures_left > 0 {
                inner.failures_left -= 1;
                return Err(ClientError::Status {
                    status: 500,
                    body: "connection reset".into(),
                });
            }
            inner.index == opts.wait_index
        };

        if unchanged && opts.wait_time.is_some() {
            tokio::time::sleep(FAKE_WAIT).await;
        }

        let inner = self.inner.lock().unwrap();
        let pair = inner.value.as_ref().map(|value| KvPair {
            key: key.to_string(),
            value: value.clone(),
        });
        Ok((
            pair,
            QueryMeta {
                last_index: inner.index,
            },
        ))
    }
}

// --- Syncer builders ---

pub fn build_syncer(
    catalog: Arc<FakeCatalog>,
    kv: Arc<FakeKv>,
    config: &SyncConfig,
) -> (Syncer, CatalogState) {
    let state = CatalogState::new();
    let syncer = Syncer::new(catalog, kv, state.clone(), config);
    (syncer, state)
}

/// A syncer over the standard catalog and the given KV document.
pub fn standard_syncer(
    document: &str,
) -> (Syncer, CatalogState, Arc<FakeCatalog>, Arc<FakeKv>) {
    let catalog = Arc::new(FakeCatalog::standard());
    let kv = Arc::new(FakeKv::new(document, 1));
    let (syncer, state) = build_syncer(catalog.clone(), kv.clone(), &test_sync_config());
    (syncer, state, catalog, kv)
}
