use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::caps::CapStatus;
use crate::rewards::{AdViewOutcome, AdViewSubmission};
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct AdViewRequest {
    pub user_id: String,
    // reported by the ad network, authoritative for revenue attribution
    pub country_code: String,
    pub admob_impression_id: Option<String>,
    pub estimated_earnings_usd: Option<Decimal>,
    // optional so the server default applies when the network omits it
    pub coins_earned: Option<i64>,
}

pub async fn submit_ad_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AdViewRequest>,
) -> Result<Json<AdViewOutcome>> {
    let outcome = state
        .reward_service
        .submit_ad_view(AdViewSubmission {
            user_id: req.user_id,
            country_code: req.country_code,
            admob_impression_id: req.admob_impression_id,
            estimated_earnings_usd: req.estimated_earnings_usd,
            coins_earned: req.coins_earned,
            client_ip: super::client_ip(&headers),
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct InterstitialRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct InterstitialResponse {
    pub cap: CapStatus,
}

// earns nothing; unblocks the next rewarded views
pub async fn record_interstitial(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InterstitialRequest>,
) -> Result<Json<InterstitialResponse>> {
    let cap = state.reward_service.record_interstitial(&req.user_id).await?;

    Ok(Json(InterstitialResponse { cap }))
}
