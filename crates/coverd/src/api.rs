use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Attributes;
use crate::engine::Engine;
use crate::engine::EntityState;
use crate::engine::ServiceCaller;
use crate::engine::ServiceError;
use crate::engine::StateReader;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Body of POST /v1/states/:entity_id
#[derive(Debug, Deserialize)]
struct SetStateRequest {
    state: String,
    #[serde(default)]
    attributes: Attributes,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/states, sorted by entity id
#[tracing::instrument(skip(state))]
async fn list_states(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    let mut entities: Vec<EntityState> = snapshot.entities.values().cloned().collect();
    entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    Json(entities)
}

/// Handler for GET /v1/states/:entity_id
#[tracing::instrument(skip(state))]
async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Response {
    match state.engine.get_state(&entity_id) {
        Some(entity) => Json(entity).into_response(),
        None => error(
            StatusCode::NOT_FOUND,
            format!("entity {} not found", entity_id),
        ),
    }
}

/// Handler for POST /v1/states/:entity_id
#[tracing::instrument(skip(state, body))]
async fn set_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(body): Json<SetStateRequest>,
) -> Response {
    if !entity_id.contains('.') {
        return error(
            StatusCode::BAD_REQUEST,
            format!("invalid entity id '{}'", entity_id),
        );
    }

    tracing::info!("Setting {} to '{}' via API", entity_id, body.state);
    let entity = state
        .engine
        .set_state(&entity_id, body.state, body.attributes);
    Json(entity).into_response()
}

/// Handler for GET /v1/services
#[tracing::instrument(skip(state))]
async fn list_services(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.services())
}

/// Handler for POST /v1/services/:domain/:service
///
/// The call blocks until the service handler has finished.
#[tracing::instrument(skip(state, data))]
async fn call_service(
    State(state): State<Arc<AppState>>,
    Path((domain, service)): Path<(String, String)>,
    Json(data): Json<serde_json::Value>,
) -> Response {
    match state.engine.call(&domain, &service, data, true).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e @ ServiceError::NotFound { .. }) => error(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => {
            tracing::warn!("Service {}.{} failed: {}", domain, service, e);
            error(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/states", get(list_states))
        .route("/v1/states/:entity_id", get(get_state).post(set_state))
        .route("/v1/services", get(list_services))
        .route("/v1/services/:domain/:service", post(call_service))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::ServiceCall;
    use crate::engine::ServiceHandler;

    struct RejectOdd;

    #[async_trait]
    impl ServiceHandler for RejectOdd {
        async fn handle(&self, call: ServiceCall) -> Result<(), ServiceError> {
            match call.data.get("value").and_then(Value::as_u64) {
                Some(v) if v % 2 == 0 => Ok(()),
                _ => Err(ServiceError::Failed("odd value".to_string())),
            }
        }
    }

    fn router() -> (Router, Arc<Engine>) {
        let engine = Arc::new(Engine::new());
        engine.register_service("test", "even", Arc::new(RejectOdd));
        let state = Arc::new(AppState {
            version: "test",
            engine: engine.clone(),
        });
        (create_router(state), engine)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (router, _) = router();
        let (status, body) = send(router, get("/v1/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_info() {
        let (router, _) = router();
        let (status, body) = send(router, get("/v1/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], json!("test"));
        assert!(body["hostname"].is_string());
    }

    #[tokio::test]
    async fn test_states() {
        let (router, engine) = router();

        let (status, _) = send(router.clone(), get("/v1/states/cover.office")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            router.clone(),
            post(
                "/v1/states/cover.office",
                json!({"state": "open", "attributes": {"supported_features": 132}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entity_id"], json!("cover.office"));
        assert_eq!(
            engine.get_state("cover.office").unwrap().attributes["supported_features"],
            json!(132)
        );

        send(
            router.clone(),
            post("/v1/states/input_boolean.a", json!({"state": "on"})),
        )
        .await;

        let (status, body) = send(router.clone(), get("/v1/states/cover.office")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], json!("open"));

        let (_, body) = send(router, get("/v1/states")).await;
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["entity_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["cover.office", "input_boolean.a"]);
    }

    #[tokio::test]
    async fn test_set_state_rejects_bad_entity_id() {
        let (router, _) = router();
        let (status, _) = send(router, post("/v1/states/nodomain", json!({"state": "on"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_services() {
        let (router, _) = router();

        let (_, body) = send(router.clone(), get("/v1/services")).await;
        assert_eq!(body, json!(["test.even"]));

        let (status, _) = send(router.clone(), post("/v1/services/test/even", json!({"value": 2}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            send(router.clone(), post("/v1/services/test/even", json!({"value": 3}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("odd value"));

        let (status, body) = send(router, post("/v1/services/test/missing", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("service test.missing not found"));
    }
}
