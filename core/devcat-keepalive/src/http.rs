//! HTTP registration client.
//!
//! Talks to a catalog's HTTP API. Responses carry absolute ids; they are
//! made relative again using the path of the endpoint URL as the base.

use crate::client::{CatalogClient, ClientFactory};
use async_trait::async_trait;
use devcat_store::{Collection, PaginatedEntity};
use devcat_types::{CatalogError, CatalogResult, Entity, LinkedDataFormatter};
use reqwest::{Client, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Transport timeout applied to every request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn transport(e: reqwest::Error) -> CatalogError {
    CatalogError::TransportFailure(e.to_string())
}

/// Client for a remote catalog at `endpoint` (e.g. `http://host:8411/dc`).
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    endpoint: String,
    formatter: LinkedDataFormatter,
    client: Client,
}

impl HttpCatalogClient {
    /// Creates a client for the catalog at `endpoint`.
    pub fn new(endpoint: &str) -> CatalogResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Self::with_client(endpoint, client)
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    pub fn with_client(endpoint: &str, client: Client) -> CatalogResult<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let url = Url::parse(&endpoint)
            .map_err(|e| CatalogError::InvalidInput(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Self {
            formatter: LinkedDataFormatter::new(url.path()),
            endpoint,
            client,
        })
    }

    /// The catalog base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn entity_url(&self, id: &str) -> String {
        format!("{}/{}", self.endpoint, id)
    }

    async fn entity_from(&self, id: &str, response: Response) -> CatalogResult<Entity> {
        let response = check_status(id, response).await?;
        let entity: Entity = response.json().await.map_err(transport)?;
        Ok(self.formatter.to_relative(&entity))
    }
}

/// Maps non-success statuses onto the catalog error taxonomy.
async fn check_status(id: &str, response: Response) -> CatalogResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = body.trim();
    Err(match status {
        StatusCode::NOT_FOUND => CatalogError::NotFound(id.to_string()),
        StatusCode::CONFLICT => CatalogError::DuplicateId(id.to_string()),
        StatusCode::BAD_REQUEST => CatalogError::InvalidInput(detail.to_string()),
        other => CatalogError::TransportFailure(format!("unexpected status {other}: {detail}")),
    })
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn get(&self, id: &str) -> CatalogResult<Entity> {
        debug!("GET {}", self.entity_url(id));
        let response = self
            .client
            .get(self.entity_url(id))
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(id, response).await?;
        let paginated: PaginatedEntity = response.json().await.map_err(transport)?;
        Ok(self.formatter.to_relative(&paginated.into_entity()))
    }

    async fn add(&self, entity: &Entity) -> CatalogResult<Entity> {
        debug!("POST {} ({})", self.endpoint, entity.id);
        let response = self
            .client
            .post(&self.endpoint)
            .json(entity)
            .send()
            .await
            .map_err(transport)?;
        self.entity_from(&entity.id, response).await
    }

    async fn update(&self, id: &str, entity: &Entity) -> CatalogResult<Entity> {
        debug!("PUT {}", self.entity_url(id));
        let response = self
            .client
            .put(self.entity_url(id))
            .json(entity)
            .send()
            .await
            .map_err(transport)?;
        self.entity_from(id, response).await
    }

    async fn delete(&self, id: &str) -> CatalogResult<Entity> {
        debug!("DELETE {}", self.entity_url(id));
        let response = self
            .client
            .delete(self.entity_url(id))
            .send()
            .await
            .map_err(transport)?;
        self.entity_from(id, response).await
    }

    async fn list(&self, page: i64, per_page: i64) -> CatalogResult<(Vec<Entity>, usize)> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await
            .map_err(transport)?;
        let response = check_status("", response).await?;
        let collection: Collection = response.json().await.map_err(transport)?;
        let total = collection.total;
        let entities = collection
            .into_entities()
            .iter()
            .map(|e| self.formatter.to_relative(e))
            .collect();
        Ok((entities, total))
    }
}

/// Builds [`HttpCatalogClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    client: Client,
}

impl HttpClientFactory {
    pub fn new() -> CatalogResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self { client })
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, endpoint: &str) -> CatalogResult<Arc<dyn CatalogClient>> {
        Ok(Arc::new(HttpCatalogClient::with_client(
            endpoint,
            self.client.clone(),
        )?))
    }
}
