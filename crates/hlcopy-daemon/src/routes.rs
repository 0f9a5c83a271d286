//! Axum router for the daemon's HTTP status surface (§6): `GET /healthz`
//! (liveness, always 200 once bound), `GET /v1/status` (the `StatusSnapshot`
//! as JSON), and `GET /v1/assess/:trader` (the on-demand trade-based
//! assessment, §4.2.2). Grounded in `mqk-daemon::routes::build_router`,
//! trimmed to the routes this spec actually names — the teacher's
//! integrity-arm/run-lifecycle/trading-snapshot routes have no counterpart.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::api_types::{ApiError, HealthResponse};
use crate::state::{uptime_secs, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status_handler))
        .route("/v1/assess/:trader", get(assess_handler))
        .with_state(state)
}

async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { ok: true, service: st.build.service, version: st.build.version }))
}

async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.uptime_secs = uptime_secs();
    (StatusCode::OK, Json(snap))
}

/// On-demand trade-based assessment (§4.2.2). Reads the `TradeMetrics` rows
/// the refresh cadence already recomputed each cycle rather than deriving
/// them again per request.
async fn assess_handler(State(st): State<Arc<AppState>>, Path(trader): Path<String>) -> impl IntoResponse {
    let primary = match hlcopy_db::load_trade_metrics(&st.pool, &trader, 30).await {
        Ok(Some(m)) => m,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(ApiError { error: format!("no trade metrics for {trader}") })).into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: e.to_string() })).into_response(),
    };
    let window_7d = match hlcopy_db::load_trade_metrics(&st.pool, &trader, 7).await {
        Ok(m) => m,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: e.to_string() })).into_response(),
    };

    let input = hlcopy_scorer::AssessmentInput { primary: &primary, window_7d: window_7d.as_ref(), window_30d: Some(&primary) };
    let assessment = hlcopy_scorer::assess(&input);
    (StatusCode::OK, Json(assessment)).into_response()
}
