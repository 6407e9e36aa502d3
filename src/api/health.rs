use axum::{
    Json,
    response::IntoResponse,
    extract::State,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::error::Result;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "Rewards Settlement Backend",
        "version": "0.1.0"
    }))
}

#[derive(Debug, Serialize)]
pub struct PublicConfigResponse {
    pub coins_per_ad: i64,
    pub daily_video_limit: i32,
    pub min_withdrawal_usd: String,
    pub rates_last_refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
}

// non-sensitive tunables the client needs to render quotas correctly
pub async fn public_config(State(state): State<Arc<AppState>>) -> Result<Json<PublicConfigResponse>> {
    Ok(Json(PublicConfigResponse {
        coins_per_ad: state.config.coins_per_ad,
        daily_video_limit: state.config.daily_video_limit,
        min_withdrawal_usd: state.config.min_withdrawal_usd.to_string(),
        rates_last_refreshed_at: state.rates.last_refreshed_at(),
    }))
}
