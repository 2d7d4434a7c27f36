use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::{ingest, store::ReadingStore};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DEVICE_ID: &str = "device-1";

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<ReadingStore>>,
    default_device_id: Arc<str>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let default_device_id =
        std::env::var("DEFAULT_DEVICE_ID").unwrap_or_else(|_| DEFAULT_DEVICE_ID.to_string());
    let allowed_origin = std::env::var("ALLOWED_ORIGIN").unwrap_or_else(|_| "*".to_string());

    let state = AppState {
        store: Arc::new(Mutex::new(ReadingStore::default())),
        default_device_id: default_device_id.into(),
    };
    let app = router(state).layer(cors_layer(&allowed_origin)?);

    let port = std::env::var("COLLECTOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind collector at {addr}"))?;

    info!("collector listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// Nodes built with the default endpoint post to `/sensor`; `/data` is the
// collector's own ingest path.
fn router(state: AppState) -> Router {
    Router::new()
        .route("/data", get(handle_get_readings).post(handle_ingest))
        .route("/sensor", post(handle_ingest))
        .route("/data/latest", get(handle_get_latest))
        .with_state(state)
}

fn cors_layer(allowed_origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = if allowed_origin == "*" {
        AllowOrigin::any()
    } else {
        let origin = HeaderValue::from_str(allowed_origin)
            .with_context(|| format!("invalid ALLOWED_ORIGIN `{allowed_origin}`"))?;
        AllowOrigin::exact(origin)
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

async fn handle_ingest(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

    let reading = match ingest::parse(&body, &state.default_device_id, timestamp) {
        Ok(reading) => reading,
        Err(err) => {
            warn!("rejected reading: {err}");
            return status_response(StatusCode::BAD_REQUEST, "error", Some(err.to_string()));
        }
    };

    let summary = format!(
        "reading from {}: {:?} risk, {:?}",
        reading.device_id, reading.assessment.risk, reading.assessment.risk_reasons
    );
    let held = {
        let mut store = state.store.lock().await;
        store.push(reading);
        store.len()
    };
    info!("{summary} ({held} held)");
    status_response(StatusCode::OK, "success", None)
}

async fn handle_get_readings(State(state): State<AppState>) -> impl IntoResponse {
    let readings = state.store.lock().await.snapshot();
    Json(readings)
}

async fn handle_get_latest(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.lock().await.latest() {
        Some(reading) => Json(reading.clone()).into_response(),
        None => status_response(
            StatusCode::NOT_FOUND,
            "error",
            Some("No readings yet".to_string()),
        ),
    }
}

fn status_response(
    code: StatusCode,
    status: &'static str,
    message: Option<String>,
) -> axum::response::Response {
    (code, Json(StatusBody { status, message })).into_response()
}
