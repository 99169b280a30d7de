//! Registry and KV client interfaces, plus an HTTP implementation against
//! the Consul API.
//!
//! The sync loops only depend on [`CatalogClient`] and [`KvClient`], so tests
//! and embedders can substitute their own implementations.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

use crate::config::ConsulConfig;
use crate::error::ClientError;

/// Header carrying the blocking query change index.
const INDEX_HEADER: &str = "X-Consul-Index";

/// Header carrying the ACL token.
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Extra client-side slack on top of the server's wait/16 jitter.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Blocking query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long the server may hold the request waiting for a change.
    pub wait_time: Option<Duration>,
    /// Index the caller has already seen. Zero means "return immediately".
    pub wait_index: u64,
}

/// Metadata returned with a blocking query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Change index of the returned data.
    pub last_index: u64,
}

/// One instance of a catalog service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CatalogService {
    /// Node name.
    pub node: String,
    /// Node address.
    pub address: String,
    /// Service name.
    pub service_name: String,
    /// Service-specific address, empty when the node address applies.
    pub service_address: String,
    /// Service tags.
    #[serde(deserialize_with = "null_as_default")]
    pub service_tags: Vec<String>,
    /// Service metadata.
    #[serde(deserialize_with = "null_as_default")]
    pub service_meta: HashMap<String, String>,
}

impl CatalogService {
    /// The address clients should use: the service address when set,
    /// otherwise the node address.
    pub fn effective_address(&self) -> &str {
        if self.service_address.is_empty() {
            &self.address
        } else {
            &self.service_address
        }
    }
}

/// A KV entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Full key path.
    pub key: String,
    /// Raw value.
    pub value: Vec<u8>,
}

/// Read access to the service catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch the live instances of one service.
    async fn service(
        &self,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<CatalogService>, ClientError>;

    /// List every service with its tags, blocking per `opts`.
    async fn services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(HashMap<String, Vec<String>>, QueryMeta), ClientError>;
}

/// Read access to the KV store.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Fetch one key, blocking per `opts`. A missing key yields `None`.
    async fn get(
        &self,
        key: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), ClientError>;
}

/// Consul HTTP API client implementing both capabilities.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ConsulClient {
    /// Create a client for the given agent. `wait_time` sizes the request
    /// timeout so blocking queries are not cut short.
    pub fn new(config: &ConsulConfig, wait_time: Duration) -> Result<Self, ClientError> {
        let scheme = if config.scheme == "https" {
            "https"
        } else {
            "http"
        };

        let http = reqwest::Client::builder()
            .timeout(request_timeout(wait_time))
            .build()?;

        let base_url = Url::parse(&format!("{}://{}", scheme, config.endpoint))
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", config.endpoint, e)))?;

        Ok(Self {
            http,
            base_url,
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn kv_endpoint(&self, key: &str) -> Result<Url, ClientError> {
        let key = key.split('/').filter(|segment| !segment.is_empty());
        self.endpoint(["v1", "kv"].into_iter().chain(key))
    }

    fn get_request(&self, url: Url, opts: &QueryOptions) -> RequestBuilder {
        trace!(%url, index = opts.wait_index, "consul request");

        let mut request = self.http.get(url).query(&blocking_params(opts));
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        request
    }
}

#[async_trait]
impl CatalogClient for ConsulClient {
    async fn service(
        &self,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<CatalogService>, ClientError> {
        let response = self
            .get_request(self.endpoint(["v1", "catalog", "service", name])?, opts)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(HashMap<String, Vec<String>>, QueryMeta), ClientError> {
        let response = self
            .get_request(self.endpoint(["v1", "catalog", "services"])?, opts)
            .send()
            .await?;
        let response = check_status(response).await?;
        let meta = query_meta(&response)?;
        let services: HashMap<String, Option<Vec<String>>> = response.json().await?;

        let services = services
            .into_iter()
            .map(|(name, tags)| (name, tags.unwrap_or_default()))
            .collect();
        Ok((services, meta))
    }
}

#[async_trait]
impl KvClient for ConsulClient {
    async fn get(
        &self,
        key: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), ClientError> {
        let response = self
            .get_request(self.kv_endpoint(key)?, opts)
            .query(&[("raw", "")])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let meta = query_meta(&response)?;
            return Ok((None, meta));
        }

        let response = check_status(response).await?;
        let meta = query_meta(&response)?;
        let value = response.bytes().await?.to_vec();
        Ok((
            Some(KvPair {
                key: key.to_string(),
                value,
            }),
            meta,
        ))
    }
}

/// Query string for a blocking request.
fn blocking_params(opts: &QueryOptions) -> Vec<(&'static str, String)> {
    let mut params = Vec::with_capacity(2);
    if opts.wait_index != 0 {
        params.push(("index", opts.wait_index.to_string()));
    }
    if let Some(wait) = opts.wait_time {
        params.push(("wait", format!("{}ms", wait.as_millis())));
    }
    params
}

/// The server adds up to wait/16 of jitter to a blocking query.
fn request_timeout(wait_time: Duration) -> Duration {
    wait_time + wait_time / 16 + REQUEST_TIMEOUT_MARGIN
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(url));
    }
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

fn query_meta(response: &Response) -> Result<QueryMeta, ClientError> {
    let raw = response
        .headers()
        .get(INDEX_HEADER)
        .ok_or_else(|| ClientError::InvalidIndex("missing header".into()))?;
    let raw = raw
        .to_str()
        .map_err(|e| ClientError::InvalidIndex(e.to_string()))?;
    let last_index = raw
        .parse()
        .map_err(|_| ClientError::InvalidIndex(raw.to_string()))?;
    Ok(QueryMeta { last_index })
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_params_skip_zero_index() {
        let params = blocking_params(&QueryOptions {
            wait_time: Some(Duration::from_secs(600)),
            wait_index: 0,
        });
        assert_eq!(params, vec![("wait", "600000ms".to_string())]);
    }

    #[test]
    fn test_blocking_params_with_index() {
        let params = blocking_params(&QueryOptions {
            wait_time: None,
            wait_index: 42,
        });
        assert_eq!(params, vec![("index", "42".to_string())]);
    }

    #[test]
    fn test_request_timeout_exceeds_wait() {
        let wait = Duration::from_secs(600);
        assert_eq!(request_timeout(wait), Duration::from_millis(647_500));
    }

    #[test]
    fn test_client_base_url() {
        let config = ConsulConfig {
            scheme: "https".into(),
            endpoint: "consul.service:8501".into(),
            token: Some(String::new()),
        };
        let client = ConsulClient::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "https://consul.service:8501");
        assert!(client.token.is_none());
    }

    #[test]
    fn test_unknown_scheme_falls_back_to_http() {
        let config = ConsulConfig {
            scheme: "gopher".into(),
            ..Default::default()
        };
        let client = ConsulClient::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8500");
    }

    #[test]
    fn test_paths_are_percent_encoded() {
        let client = ConsulClient::new(&ConsulConfig::default(), Duration::from_secs(1)).unwrap();

        let url = client.endpoint(["v1", "catalog", "service", "my service"]).unwrap();
        assert_eq!(url.path(), "/v1/catalog/service/my%20service");

        let url = client.kv_endpoint("/dns/config?x#y").unwrap();
        assert_eq!(url.path(), "/v1/kv/dns/config%3Fx%23y");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_catalog_service_tolerates_nulls() {
        let svc: CatalogService = serde_json::from_str(
            r#"{"Node": "n1", "Address": "10.0.0.1", "ServiceName": "web",
                "ServiceAddress": "", "ServiceTags": null, "ServiceMeta": null,
                "ServicePort": 8080}"#,
        )
        .unwrap();
        assert!(svc.service_tags.is_empty());
        assert!(svc.service_meta.is_empty());
        assert_eq!(svc.effective_address(), "10.0.0.1");
    }

    #[test]
    fn test_effective_address_prefers_service_address() {
        let svc = CatalogService {
            address: "10.0.0.1".into(),
            service_address: "10.1.0.1".into(),
            ..Default::default()
        };
        assert_eq!(svc.effective_address(), "10.1.0.1");
    }
}
