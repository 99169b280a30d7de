//! Error types for consul-catalog.

use thiserror::Error;

/// Errors returned by a registry or KV client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// The change index header was missing or not a number.
    #[error("invalid change index: {0}")]
    InvalidIndex(String),

    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The configured endpoint does not form a usable URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors produced while parsing ACL rule strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    /// A clause lacks the space separating action from networks.
    #[error("could not parse acl rule <{0}>")]
    MalformedRule(String),

    /// A clause references a network absent from the network table.
    #[error("unknown network {0}")]
    UnknownNetwork(String),
}

/// Errors that abort a whole sync cycle.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Registry or KV client failure.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The KV document is not valid JSON of the expected shape.
    #[error("could not decode config document: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured KV key does not exist.
    #[error("config key {0} not found")]
    MissingConfig(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why a single KV entry or catalog service was left out of a snapshot.
///
/// These never abort a cycle; they are logged and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// A proxy target was requested but no proxy service is configured.
    #[error("requested service proxy but none is configured")]
    ProxyNotConfigured,

    /// The service does not carry the exposure tag.
    #[error("service is not tagged for exposure")]
    NotExposed,

    /// The entry's ACL could not be parsed.
    #[error("could not parse ACL: {0}")]
    InvalidAcl(AclError),

    /// Instance lookup for the service failed.
    #[error("failed to fetch service instances")]
    HydrationFailed,

    /// Instance lookup returned nothing.
    #[error("no instances found, check the permissions for your token")]
    NoInstances,

    /// No ACL metadata and the ACL-ignore tag is not set.
    #[error("no ACL defined for service")]
    MissingAcl,

    /// A KV document entry does not have the expected shape.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

impl SkipReason {
    /// Short label used as a metrics dimension.
    pub fn as_label(&self) -> &'static str {
        match self {
            SkipReason::ProxyNotConfigured => "proxy_not_configured",
            SkipReason::NotExposed => "not_exposed",
            SkipReason::InvalidAcl(_) => "invalid_acl",
            SkipReason::HydrationFailed => "hydration_failed",
            SkipReason::NoInstances => "no_instances",
            SkipReason::MissingAcl => "missing_acl",
            SkipReason::InvalidEntry(_) => "invalid_entry",
        }
    }
}
