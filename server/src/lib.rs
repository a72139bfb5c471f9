//! HTTP API for the devcat catalog.
//!
//! Routes (`{api}` is the API location, `/dc` by default):
//!
//! ```text
//! GET    {api}                                  collection page
//! POST   {api}                                  register an entity
//! GET    {api}/{type}/{path}/{op}/{value}       attribute-path filter
//! GET    {api}/{root}/{leaf}                    entity with a page of resources
//! PUT    {api}/{root}/{leaf}                    replace an entity
//! DELETE {api}/{root}/{leaf}                    remove an entity
//! GET    {api}/{root}/{leaf}/{resource}         single resource
//! GET    /static/*                              files of the static directory, if set
//! ```

mod sweeper;

pub use sweeper::spawn_expiry_sweeper;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use devcat_store::{FilterMatch, FilterTarget, RegistryStore, ViewBuilder};
use devcat_types::{API_VERSION, CatalogError, Entity};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const PARAM_PAGE: &str = "page";
const PARAM_PER_PAGE: &str = "per_page";

/// Mount point of the static directory (JSON-LD contexts and the like).
pub const STATIC_LOCATION: &str = "/static";

/// Content type of every successful response.
pub fn ld_content_type() -> String {
    format!("application/ld+json;version={API_VERSION}")
}

/// State shared by all handlers.
pub struct AppState {
    store: Arc<RegistryStore>,
    views: ViewBuilder,
    static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(store: Arc<RegistryStore>, views: ViewBuilder) -> Self {
        Self {
            store,
            views,
            static_dir: None,
        }
    }

    /// Serves the files under `dir` at [`STATIC_LOCATION`].
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    pub fn static_dir(&self) -> Option<&FsPath> {
        self.static_dir.as_deref()
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// Path prefix all routes live under.
    pub fn api_location(&self) -> &str {
        self.views.formatter().base()
    }
}

/// A [`CatalogError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CatalogError);

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        Self(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::DuplicateId(_) => StatusCode::CONFLICT,
            CatalogError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CatalogError::StorageFailure(_)
            | CatalogError::TransportFailure(_)
            | CatalogError::ProtocolExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected ({status}): {}", self.0);
        }
        (status, format!("Error processing the request: {}\n", self.0)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn ld_json<T: Serialize>(status: StatusCode, body: &T) -> ApiResult {
    let bytes = serde_json::to_vec(body).map_err(|e| CatalogError::StorageFailure(e.to_string()))?;
    let mut response = (status, bytes).into_response();
    let content_type = HeaderValue::from_str(&ld_content_type())
        .map_err(|e| CatalogError::StorageFailure(e.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}

/// Reads `page`/`per_page`; missing or non-numeric values fall back to 0,
/// which the page clamp turns into the defaults.
fn paging(params: &HashMap<String, String>) -> (i64, i64) {
    let read = |key: &str| {
        params
            .get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    };
    (read(PARAM_PAGE), read(PARAM_PER_PAGE))
}

fn parse_entity(state: &AppState, body: &[u8]) -> Result<Entity, ApiError> {
    let entity: Entity = serde_json::from_slice(body)?;
    Ok(state.views.formatter().to_relative(&entity))
}

// ── Handlers ─────────────────────────────────────────────────────

async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let (page, per_page) = paging(&params);
    let (entities, total) = state.store.get_many(page, per_page)?;
    let collection = state
        .views
        .collection(&entities, state.views.page(page, per_page), total);
    ld_json(StatusCode::OK, &collection)
}

async fn filter(
    State(state): State<Arc<AppState>>,
    Path((ftype, path, op, value)): Path<(String, String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let (page, per_page) = paging(&params);
    let target = FilterTarget::parse(&ftype, state.views.kind())?;
    let request = state.views.page(page, per_page);

    match state
        .store
        .path_filter(target, &path, &op, &value, page, per_page)?
    {
        FilterMatch::Entity(entity) => {
            ld_json(StatusCode::OK, &state.views.paginated_entity(&entity, request))
        }
        FilterMatch::Entities { entities, total } => {
            ld_json(StatusCode::OK, &state.views.collection(&entities, request, total))
        }
        FilterMatch::Resource(resource) => {
            ld_json(StatusCode::OK, &state.views.resource(&resource))
        }
    }
}

async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path((root, leaf)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let (page, per_page) = paging(&params);
    let entity = state.store.get(&format!("{root}/{leaf}"))?;
    let view = state
        .views
        .paginated_entity(&entity, state.views.page(page, per_page));
    ld_json(StatusCode::OK, &view)
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path((root, leaf, name)): Path<(String, String, String)>,
) -> ApiResult {
    let entity_id = format!("{root}/{leaf}");
    state.store.get(&entity_id)?;
    let resource = state.store.get_resource(&format!("{entity_id}/{name}"))?;
    ld_json(StatusCode::OK, &state.views.resource(&resource))
}

async fn add(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let entity = parse_entity(&state, &body)?;
    let location = format!("{}/{}", state.api_location(), entity.id);
    let location = HeaderValue::from_bytes(location.as_bytes())
        .map_err(|e| CatalogError::InvalidInput(format!("id not usable in a header: {e}")))?;

    let added = state.store.add(entity)?;
    info!("Registered {}", added.id);

    let mut response = ld_json(StatusCode::CREATED, &state.views.entity(&added))?;
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

async fn update(
    State(state): State<Arc<AppState>>,
    Path((root, leaf)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    let entity = parse_entity(&state, &body)?;
    let updated = state.store.update(&format!("{root}/{leaf}"), entity)?;
    debug!("Updated {}", updated.id);
    ld_json(StatusCode::OK, &state.views.entity(&updated))
}

async fn delete(
    State(state): State<Arc<AppState>>,
    Path((root, leaf)): Path<(String, String)>,
) -> ApiResult {
    let removed = state.store.delete(&format!("{root}/{leaf}"))?;
    info!("Deregistered {}", removed.id);
    ld_json(StatusCode::OK, &state.views.entity(&removed))
}

/// Request tracing and panic recovery; a panicking handler answers 500.
pub fn apply_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Builds the catalog router. Catalog routes live under the state's API
/// location, static files under [`STATIC_LOCATION`].
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = state.api_location().to_string();
    let static_dir = state.static_dir().map(FsPath::to_path_buf);
    let root = if api.is_empty() { "/".to_string() } else { api.clone() };

    let mut router = Router::new().route(&root, get(list).post(add));
    if !api.is_empty() {
        router = router.route(&format!("{api}/"), post(add));
    }
    router = router
        .route(
            &format!("{api}/{{root}}/{{leaf}}"),
            get(get_entity).put(update).delete(delete),
        )
        .route(&format!("{api}/{{root}}/{{leaf}}/{{resource}}"), get(get_resource))
        .route(
            &format!("{api}/{{ftype}}/{{path}}/{{op}}/{{value}}"),
            get(filter),
        );
    if let Some(dir) = static_dir {
        router = router.nest_service(STATIC_LOCATION, ServeDir::new(dir));
    }
    apply_middleware(router.with_state(state))
}
