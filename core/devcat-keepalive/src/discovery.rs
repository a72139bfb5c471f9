//! Catalog endpoint discovery.
//!
//! Discovery transports (DNS-SD and the like) live outside this crate; the
//! keepalive controller only sees [`EndpointResolver`].

use async_trait::async_trait;
use devcat_types::CatalogResult;
use std::fmt;
use std::sync::Arc;

/// Service type a catalog announces itself under.
pub const DEFAULT_SERVICE_TYPE: &str = "_devcat._tcp";

/// Resolves a logical service type to a live catalog base URL.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, service_type: &str) -> CatalogResult<String>;
}

/// A resolver that always answers with the same endpoint.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    endpoint: String,
}

impl StaticResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self, _service_type: &str) -> CatalogResult<String> {
        Ok(self.endpoint.clone())
    }
}

/// Where the keepalive controller finds its catalog.
#[derive(Clone)]
pub enum CatalogEndpoint {
    /// A fixed base URL, e.g. `http://catalog:8411/dc`.
    Fixed(String),
    /// Resolved through `resolver` on start and after every escalation.
    Discovered {
        service_type: String,
        resolver: Arc<dyn EndpointResolver>,
    },
}

impl CatalogEndpoint {
    /// Discovery of `service_type` through `resolver`.
    pub fn discovered(service_type: impl Into<String>, resolver: Arc<dyn EndpointResolver>) -> Self {
        Self::Discovered {
            service_type: service_type.into(),
            resolver,
        }
    }

    /// Returns the base URL to connect to now.
    pub async fn resolve(&self) -> CatalogResult<String> {
        match self {
            Self::Fixed(url) => Ok(url.clone()),
            Self::Discovered {
                service_type,
                resolver,
            } => resolver.resolve(service_type).await,
        }
    }
}

impl fmt::Debug for CatalogEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(url) => f.debug_tuple("Fixed").field(url).finish(),
            Self::Discovered { service_type, .. } => f
                .debug_struct("Discovered")
                .field("service_type", service_type)
                .finish_non_exhaustive(),
        }
    }
}
