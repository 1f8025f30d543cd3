//! HTTP remote access layer
//!
//! Mirrors the [`Tank`](crate::tank::Tank) and [`TankStore`] operation
//! surface over axum so out-of-process clients get the same semantics as
//! local calls. Requests carry `Authorization: Bearer <token>` and the
//! server compares SHA-256 digests of the shared secret.
//!
//! # Endpoints
//!
//! - `GET  /health` - server status (unauthenticated)
//! - `POST /tanks` - create a tank
//! - `GET  /tanks` - list tank names
//! - `GET  /tanks/:name` - tank info
//! - `POST /tanks/:name/vectors` - add one vector
//! - `POST /tanks/:name/vectors/batch` - add a batch atomically
//! - `POST /tanks/:name/search` - similarity search
//! - `PUT  /tanks/:name/vectors/:key` - update a vector in place
//! - `DELETE /tanks/:name/vectors/:key` - delete one key
//! - `POST /tanks/:name/vectors/delete` - batch delete (skips unknown keys)
//! - `POST /tanks/:name/filter` - equality filter over metadata
//! - `POST /tanks/:name/save` - persist the tank's record

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tower_http::cors::{Any, CorsLayer};

use crate::error::TankError;
use crate::similarity::SimMethod;
use crate::store::TankStore;
use crate::tank::{MetadataFilter, SearchHit, Tank, TankConfig};

/// Shared application state
pub struct AppState {
    pub store: Arc<TankStore>,
    /// SHA-256 digest of the shared auth token.
    token_digest: [u8; 32],
}

impl AppState {
    pub fn new(store: Arc<TankStore>, auth_token: &str) -> Self {
        Self {
            store,
            token_digest: Sha256::digest(auth_token.as_bytes()).into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTankRequest {
    pub name: String,
    pub dim: usize,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub metric: Option<SimMethod>,
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub meta_slot_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TankInfo {
    pub name: String,
    pub dim: usize,
    pub capacity: usize,
    pub metric: SimMethod,
    pub persist: bool,
    pub len: usize,
}

impl TankInfo {
    fn from_tank(tank: &Tank) -> Self {
        let config = tank.config();
        Self {
            name: config.name.clone(),
            dim: config.dim,
            capacity: config.capacity,
            metric: config.metric,
            persist: config.persist,
            len: tank.len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddVectorRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddVectorResponse {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddBatchRequest {
    pub vectors: Vec<Vec<f32>>,
    pub metadata: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddBatchResponse {
    pub keys: Vec<String>,
}

/// Search request body
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query vector (must match the tank's dimensions)
    pub vector: Vec<f32>,

    /// Number of results to return (default: 10)
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Override the tank's default similarity method
    #[serde(default)]
    pub method: Option<SimMethod>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub query_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateVectorRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteKeysRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteKeysResponse {
    pub deleted: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterRequest {
    pub equals: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub tanks: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn map_error(e: TankError) -> ApiError {
    let status = match &e {
        TankError::NotFound(_) => StatusCode::NOT_FOUND,
        TankError::DuplicateName(_) | TankError::CapacityExceeded { .. } => StatusCode::CONFLICT,
        TankError::InvalidDimension { .. }
        | TankError::UnsupportedMetric(_)
        | TankError::BatchMismatch { .. }
        | TankError::IndexOutOfBounds { .. } => StatusCode::BAD_REQUEST,
        TankError::SerializationOverflow { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

/// Compare the request's bearer token digest against the configured secret.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
    if digest != state.token_digest {
        return Err(api_error(StatusCode::FORBIDDEN, "invalid token"));
    }
    Ok(())
}

fn lookup_tank(state: &AppState, name: &str) -> Result<Arc<Tank>, ApiError> {
    state
        .store
        .get_tank(name)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("tank '{name}' not found")))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        tanks: state.store.tank_names().len(),
    })
}

async fn create_tank(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateTankRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;

    let mut config = TankConfig::new(request.name, request.dim).persist(request.persist);
    if let Some(capacity) = request.capacity {
        config = config.capacity(capacity);
    }
    if let Some(metric) = request.metric {
        config = config.metric(metric);
    }
    if let Some(meta_slot_size) = request.meta_slot_size {
        config = config.meta_slot_size(meta_slot_size);
    }

    let tank = state.store.create_tank(config).map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(TankInfo::from_tank(&tank))).into_response())
}

async fn list_tanks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.store.tank_names()))
}

async fn tank_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<TankInfo>, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    Ok(Json(TankInfo::from_tank(&tank)))
}

async fn add_vector(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<AddVectorRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    let key = tank
        .add_vector(&request.vector, request.metadata)
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(AddVectorResponse { key })).into_response())
}

async fn add_vectors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<AddBatchRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    let keys = tank
        .add_vectors(&request.vectors, request.metadata)
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(AddBatchResponse { keys })).into_response())
}

async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;

    let start = Instant::now();
    let results = tank
        .search(&request.vector, request.top_k, request.method)
        .map_err(map_error)?;
    let query_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(Json(SearchResponse {
        results,
        query_time_ms,
    }))
}

async fn update_vector(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, key)): Path<(String, String)>,
    Json(request): Json<UpdateVectorRequest>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    tank.update_vector(&key, &request.vector, request.metadata)
        .map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_vector(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    tank.delete(&key).map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<DeleteKeysRequest>,
) -> Result<Json<DeleteKeysResponse>, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    let deleted = tank.delete_keys(&request.keys).map_err(map_error)?;
    Ok(Json(DeleteKeysResponse { deleted }))
}

async fn filter(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<FilterResponse>, ApiError> {
    authorize(&state, &headers)?;
    let tank = lookup_tank(&state, &name)?;
    let keys = tank.filter_by_metadata(&MetadataFilter::Equals(request.equals));
    Ok(Json(FilterResponse { keys }))
}

async fn save_tank(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    state.store.save_tank(&name).map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create the axum router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/tanks", post(create_tank).get(list_tanks))
        .route("/tanks/:name", get(tank_info))
        .route("/tanks/:name/vectors", post(add_vector))
        .route("/tanks/:name/vectors/batch", post(add_vectors))
        .route("/tanks/:name/vectors/delete", post(delete_keys))
        .route(
            "/tanks/:name/vectors/:key",
            put(update_vector).delete(delete_vector),
        )
        .route("/tanks/:name/search", post(search))
        .route("/tanks/:name/filter", post(filter))
        .route("/tanks/:name/save", post(save_tank))
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until the task is cancelled.
pub async fn serve(state: Arc<AppState>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    const TOKEN: &str = "test-secret";

    fn unique(name: &str) -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static SEQ: AtomicU64 = AtomicU64::new(0);
        format!(
            "{}_{}_{}",
            name,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    struct TestServer {
        state: Arc<AppState>,
        _dir: tempfile::TempDir,
    }

    impl TestServer {
        fn new(tag: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let channel = unique(&format!("srv_{tag}_comm"));
            let store = TankStore::open(dir.path(), Some(&channel)).unwrap();
            Self {
                state: Arc::new(AppState::new(store, TOKEN)),
                _dir: dir,
            }
        }

        fn router(&self) -> Router {
            create_router(Arc::clone(&self.state))
        }

        async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> Response {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header("Authorization", format!("Bearer {TOKEN}"));
            let body = match body {
                Some(value) => {
                    builder = builder.header("Content-Type", "application/json");
                    Body::from(serde_json::to_string(&value).unwrap())
                }
                None => Body::empty(),
            };
            self.router()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap()
        }

        fn stop(&self) {
            self.state.store.stop();
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let server = TestServer::new("health");
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        server.stop();
    }

    #[tokio::test]
    async fn rejects_missing_and_wrong_tokens() {
        let server = TestServer::new("auth");

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/tanks")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/tanks")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        server.stop();
    }

    #[tokio::test]
    async fn create_add_search_flow() {
        let server = TestServer::new("flow");
        let tank = unique("api_flow");

        let response = server
            .request(
                "POST",
                "/tanks",
                Some(json!({ "name": tank, "dim": 3, "capacity": 10, "metric": "cosine" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        for (vector, group) in [
            (json!([1.0, 0.0, 0.0]), "A"),
            (json!([0.0, 1.0, 0.0]), "B"),
        ] {
            let response = server
                .request(
                    "POST",
                    &format!("/tanks/{tank}/vectors"),
                    Some(json!({ "vector": vector, "metadata": { "g": group } })),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = server
            .request(
                "POST",
                &format!("/tanks/{tank}/search"),
                Some(json!({ "vector": [1.0, 0.0, 0.0], "top_k": 1 })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["results"][0]["key"], "1");
        assert_eq!(body["results"][0]["metadata"]["g"], "A");

        let response = server
            .request(
                "POST",
                &format!("/tanks/{tank}/filter"),
                Some(json!({ "equals": { "g": "B" } })),
            )
            .await;
        let body = body_json(response).await;
        assert_eq!(body["keys"], json!(["2"]));
        server.stop();
    }

    #[tokio::test]
    async fn dimension_mismatch_is_bad_request() {
        let server = TestServer::new("dim");
        let tank = unique("api_dim");

        server
            .request("POST", "/tanks", Some(json!({ "name": tank, "dim": 4 })))
            .await;
        let response = server
            .request(
                "POST",
                &format!("/tanks/{tank}/search"),
                Some(json!({ "vector": [1.0, 2.0], "top_k": 5 })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        server.stop();
    }

    #[tokio::test]
    async fn duplicate_tank_is_conflict() {
        let server = TestServer::new("dup");
        let tank = unique("api_dup");

        let request = json!({ "name": tank, "dim": 2 });
        let first = server.request("POST", "/tanks", Some(request.clone())).await;
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = server.request("POST", "/tanks", Some(request)).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        server.stop();
    }

    #[tokio::test]
    async fn unknown_tank_is_not_found() {
        let server = TestServer::new("missing");
        let response = server
            .request(
                "POST",
                "/tanks/no_such_tank/search",
                Some(json!({ "vector": [1.0], "top_k": 1 })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        server.stop();
    }
}
