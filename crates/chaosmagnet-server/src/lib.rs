//! HTTP control server for a running engine.
//!
//! A thin JSON adapter: every route maps onto one engine control call, and
//! engine errors map onto status codes (configuration → 400, insufficient
//! entropy → 503, persistence → 500, stopped → 409).

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use chaosmagnet_core::{Engine, EngineError, HarvesterId, MetricsSnapshot, PublicBundle};

/// Shared server state.
struct AppState {
    engine: Arc<Engine>,
}

type AppResult<T> = Result<Json<T>, ApiError>;

/// An engine error on its way out as JSON.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
            EngineError::InsufficientEntropy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Stopped => StatusCode::CONFLICT,
            EngineError::Network(_) => StatusCode::BAD_GATEWAY,
            EngineError::Persistence(_) | EngineError::KeyGeneration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(StatusResponse {
            success: false,
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
}

impl StatusResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

#[derive(Deserialize)]
struct EnabledBody {
    enabled: bool,
}

#[derive(Deserialize)]
struct AddressBody {
    address: String,
}

#[derive(Deserialize)]
struct PortBody {
    port: u32,
}

#[derive(Deserialize)]
struct MintBody {
    owner: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    running: bool,
    harvesters_enabled: usize,
    harvesters_available: usize,
    total_bytes: u64,
    extractions_count: u64,
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.engine.get_metrics())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let m = state.engine.get_metrics();
    let enabled = m.harvesters.values().filter(|h| h.enabled).count();
    let available = m.harvesters.values().filter(|h| h.available).count();
    let running = state.engine.is_running();
    Json(HealthResponse {
        status: match (running, enabled) {
            (false, _) => "stopped",
            (true, 0) => "idle",
            _ => "harvesting",
        }
        .to_string(),
        running,
        harvesters_enabled: enabled,
        harvesters_available: available,
        total_bytes: m.total_bytes,
        extractions_count: m.extractions_count,
    })
}

async fn handle_toggle_harvester(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> AppResult<StatusResponse> {
    let id: HarvesterId = id.parse()?;
    state.engine.toggle_harvester(id, body.enabled)?;
    let verb = if body.enabled { "enabled" } else { "disabled" };
    Ok(StatusResponse::ok(format!("{id} {verb}")))
}

async fn handle_toggle_uplink(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnabledBody>,
) -> AppResult<StatusResponse> {
    state.engine.toggle_uplink(body.enabled)?;
    Ok(StatusResponse::ok(if body.enabled {
        "uplink enabled"
    } else {
        "uplink disabled"
    }))
}

async fn handle_uplink_target(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddressBody>,
) -> AppResult<StatusResponse> {
    state.engine.set_network_target(&body.address)?;
    let target = state.engine.get_metrics().uplink_target;
    Ok(StatusResponse::ok(format!("uplink target {target}")))
}

async fn handle_toggle_p2p(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnabledBody>,
) -> AppResult<StatusResponse> {
    state.engine.toggle_p2p(body.enabled)?;
    Ok(StatusResponse::ok(if body.enabled {
        "p2p enabled"
    } else {
        "p2p disabled"
    }))
}

async fn handle_p2p_port(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PortBody>,
) -> AppResult<StatusResponse> {
    state.engine.set_p2p_port(body.port)?;
    Ok(StatusResponse::ok(format!("p2p port {}", body.port)))
}

async fn handle_add_peer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddressBody>,
) -> AppResult<StatusResponse> {
    state.engine.add_peer(&body.address)?;
    let peers = state.engine.get_metrics().p2p_peer_count;
    Ok(StatusResponse::ok(format!("{peers} peers")))
}

async fn handle_mint(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MintBody>,
) -> AppResult<StatusResponse> {
    let msg = state.engine.mint_pqc_bundle(&body.owner).await?;
    Ok(StatusResponse::ok(msg))
}

async fn handle_vault_list(
    State(state): State<Arc<AppState>>,
) -> AppResult<Vec<chaosmagnet_core::BundleSummary>> {
    Ok(Json(state.engine.list_bundles()?))
}

async fn handle_vault_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<PublicBundle> {
    let bundle = state.engine.load_bundle(&id)?;
    Ok(Json(bundle.public_view()))
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let node = state.engine.config().node_name.clone();
    Json(serde_json::json!({
        "name": "ChaosMagnet control server",
        "version": chaosmagnet_core::VERSION,
        "node": node,
        "harvesters": HarvesterId::ALL.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        "endpoints": {
            "/": "This API index",
            "/metrics": "Full engine snapshot",
            "/health": "Liveness summary",
            "/harvesters/{id}": { "method": "POST", "body": { "enabled": "bool" } },
            "/uplink": { "method": "POST", "body": { "enabled": "bool" } },
            "/uplink/target": { "method": "POST", "body": { "address": "host[:port]" } },
            "/p2p": { "method": "POST", "body": { "enabled": "bool" } },
            "/p2p/port": { "method": "POST", "body": { "port": "1024-65535" } },
            "/p2p/peers": { "method": "POST", "body": { "address": "ip[:port]" } },
            "/vault/mint": { "method": "POST", "body": { "owner": "label" } },
            "/vault": "List minted bundles",
            "/vault/{id}": "Public half of one bundle",
        },
    }))
}

/// Build the axum router.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = Arc::new(AppState { engine });

    Router::new()
        .route("/", get(handle_index))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .route("/harvesters/{id}", post(handle_toggle_harvester))
        .route("/uplink", post(handle_toggle_uplink))
        .route("/uplink/target", post(handle_uplink_target))
        .route("/p2p", post(handle_toggle_p2p))
        .route("/p2p/port", post(handle_p2p_port))
        .route("/p2p/peers", post(handle_add_peer))
        .route("/vault", get(handle_vault_list))
        .route("/vault/mint", post(handle_mint))
        .route("/vault/{id}", get(handle_vault_show))
        .with_state(state)
}

/// Serve the control API until `shutdown` resolves.
pub async fn run_server(
    engine: Arc<Engine>,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(engine);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("control server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaosmagnet_core::EngineConfig;
    use std::time::Duration;

    async fn serve(engine: Arc<Engine>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(engine)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn engine(dir: &std::path::Path) -> Arc<Engine> {
        let cfg = EngineConfig {
            vault_dir: dir.to_path_buf(),
            mint_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        Arc::new(Engine::start_with_sources(cfg, vec![]).unwrap())
    }

    #[tokio::test]
    async fn metrics_and_index_respond() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(engine(dir.path())).await;
        let client = reqwest::Client::new();

        let m: serde_json::Value = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(m["extractions_count"], 0);
        assert_eq!(m["p2p_port"], 9000);

        let idx = client.get(&base).send().await.unwrap();
        assert_eq!(idx.status(), 200);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let base = serve(Arc::clone(&engine)).await;
        let client = reqwest::Client::new();

        let bad_port = client
            .post(format!("{base}/p2p/port"))
            .json(&serde_json::json!({ "port": 80 }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_port.status(), 400);

        let unavailable = client
            .post(format!("{base}/harvesters/trng"))
            .json(&serde_json::json!({ "enabled": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(unavailable.status(), 400);

        let starved = client
            .post(format!("{base}/vault/mint"))
            .json(&serde_json::json!({ "owner": "alice" }))
            .send()
            .await
            .unwrap();
        assert_eq!(starved.status(), 503);

        let missing = client
            .get(format!("{base}/vault/00000000-0000-4000-8000-000000000000"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 500);

        engine.shutdown().await;
        let stopped = client
            .post(format!("{base}/uplink"))
            .json(&serde_json::json!({ "enabled": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(stopped.status(), 409);
    }

    #[tokio::test]
    async fn peers_are_added_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(engine(dir.path())).await;
        let client = reqwest::Client::new();
        for _ in 0..2 {
            let r = client
                .post(format!("{base}/p2p/peers"))
                .json(&serde_json::json!({ "address": "10.0.0.5:9000" }))
                .send()
                .await
                .unwrap();
            assert_eq!(r.status(), 200);
        }
        let m: serde_json::Value = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(m["p2p_peer_count"], 1);
    }
}
