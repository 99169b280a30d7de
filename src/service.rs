//! Building published [`Service`] records from KV entries and catalog
//! services.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, warn};

use crate::acl::{self, AclRule, Networks};
use crate::client::{null_as_default, CatalogService};
use crate::config::SyncConfig;
use crate::error::SkipReason;

/// Target value in the KV document meaning "use the configured proxy".
pub const PROXY_TARGET: &str = "@service_proxy";

/// A service published under one or more DNS names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Registry service name or KV entry name.
    pub name: String,
    /// Name DNS answers should point at.
    pub target: String,
    /// Instance addresses. Empty for KV entries.
    pub addresses: Vec<IpAddr>,
    /// Ordered ACL rules.
    pub acl: Vec<AclRule>,
    /// False when the operator opted this service out of ACL enforcement.
    pub apply_acl: bool,
}

/// One entry of the KV document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    /// Target name, or [`PROXY_TARGET`].
    #[serde(alias = "Target")]
    pub target: String,
    /// Rule strings. Missing and `null` both mean no rules.
    #[serde(
        default,
        alias = "ACL",
        alias = "Acl",
        deserialize_with = "null_as_default"
    )]
    pub acl: Vec<String>,
}

impl KvEntry {
    /// Decode one entry of the document. Failures only affect this entry.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SkipReason> {
        serde_json::from_value(value).map_err(|e| SkipReason::InvalidEntry(e.to_string()))
    }
}

/// What a service's tags say about how to publish it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    /// Carries the exposure tag.
    pub exposed: bool,
    /// Carries the proxy tag.
    pub proxied: bool,
    /// Carries the ACL-ignore tag.
    pub acl_ignore: bool,
    /// Names declared through alias tags, in tag order.
    pub aliases: Vec<String>,
}

/// Tag names recognized on catalog services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagNames {
    /// Exposure tag.
    pub tag: String,
    /// Proxy tag.
    pub proxy: Option<String>,
    /// Alias tag prefix.
    pub alias: Option<String>,
    /// ACL-ignore tag.
    pub acl_ignore: Option<String>,
}

impl TagNames {
    fn matches(name: &Option<String>, tag: &str) -> bool {
        matches!(name, Some(name) if !name.is_empty() && name == tag)
    }

    /// Classify a tag list.
    pub fn classify<S: AsRef<str>>(&self, tags: &[S]) -> TagSet {
        tags.iter().fold(TagSet::default(), |mut set, tag| {
            let tag = tag.as_ref();
            if !self.tag.is_empty() && tag == self.tag {
                set.exposed = true;
            } else if Self::matches(&self.proxy, tag) {
                set.proxied = true;
            } else if Self::matches(&self.acl_ignore, tag) {
                set.acl_ignore = true;
            } else if let Some((key, values)) = tag.split_once('=') {
                if Self::matches(&self.alias, key.trim()) {
                    set.aliases.extend(
                        values
                            .split(',')
                            .map(str::trim)
                            .filter(|alias| !alias.is_empty())
                            .map(String::from),
                    );
                }
            }
            set
        })
    }
}

/// Turns raw registry and KV facts into [`Service`] records.
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    tags: TagNames,
    proxy_service: Option<String>,
    acl_metadata_key: Option<String>,
    networks: Networks,
}

impl ServiceBuilder {
    /// Create a builder from sync settings.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            tags: TagNames {
                tag: config.tag.clone(),
                proxy: config.proxy_tag.clone(),
                alias: config.alias_tag.clone(),
                acl_ignore: config.acl_ignore_tag.clone(),
            },
            proxy_service: config.proxy_service.clone().filter(|s| !s.is_empty()),
            acl_metadata_key: config.acl_metadata_key.clone().filter(|k| !k.is_empty()),
            networks: config.networks.clone(),
        }
    }

    /// Recognized tag names.
    pub fn tag_names(&self) -> &TagNames {
        &self.tags
    }

    /// True when ACL metadata is parsed at all.
    pub fn acl_enabled(&self) -> bool {
        self.acl_metadata_key.is_some()
    }

    /// Build a service from a KV document entry.
    ///
    /// ACL errors reject the whole entry.
    pub fn build_static(&self, name: &str, entry: &KvEntry) -> Result<Service, SkipReason> {
        let target = if entry.target == PROXY_TARGET {
            self.proxy_service
                .clone()
                .ok_or(SkipReason::ProxyNotConfigured)?
        } else {
            entry.target.clone()
        };

        let acl = if self.acl_enabled() {
            acl::parse_rules(entry.acl.as_slice(), &self.networks)
                .map_err(SkipReason::InvalidAcl)?
        } else {
            Vec::new()
        };

        Ok(Service {
            name: name.to_string(),
            target,
            addresses: Vec::new(),
            acl,
            apply_acl: true,
        })
    }

    /// Build a service from a catalog listing entry and its hydrated
    /// instances.
    ///
    /// Individual bad ACL clauses are dropped; the service is still built.
    pub fn build_catalog(
        &self,
        name: &str,
        tags: &TagSet,
        instances: &[CatalogService],
    ) -> Result<Service, SkipReason> {
        if !tags.exposed {
            return Err(SkipReason::NotExposed);
        }

        let target = if tags.proxied {
            self.proxy_service
                .clone()
                .ok_or(SkipReason::ProxyNotConfigured)?
        } else {
            name.to_string()
        };

        let first = instances.first().ok_or(SkipReason::NoInstances)?;

        let acl = match &self.acl_metadata_key {
            Some(key) => match first.service_meta.get(key) {
                Some(rules) => {
                    let (rules, errors) = acl::parse_rules_lenient(&[rules], &self.networks);
                    for error in errors {
                        warn!(service = %name, %error, "dropping ACL rule");
                    }
                    rules
                }
                None if tags.acl_ignore => {
                    debug!(service = %name, "no ACL metadata, ACL enforcement ignored");
                    Vec::new()
                }
                None => return Err(SkipReason::MissingAcl),
            },
            None => Vec::new(),
        };

        let addresses = instances
            .iter()
            .filter_map(|instance| {
                let address = instance.effective_address();
                match address.parse() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        debug!(service = %name, %address, "skipping unparseable address");
                        None
                    }
                }
            })
            .collect();

        Ok(Service {
            name: name.to_string(),
            target,
            addresses,
            acl,
            apply_acl: !tags.acl_ignore,
        })
    }
}
