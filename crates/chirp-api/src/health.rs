use axum::{Json, extract::State};
use serde::Serialize;

use chirp_gateway::{DispatchStats, FanoutStats};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub fanout: FanoutStats,
    pub dispatch: DispatchStats,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        fanout: state.fanout.stats(),
        dispatch: state.dispatcher.stats(),
    })
}
