use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::audit::AuditEvent;
use crate::conversion::BatchSummary;
use crate::db::models::{AuditRecord, LedgerTransaction, RevenuePool, TransactionType};
use crate::error::Result;
use crate::ledger::ReconcileReport;
use crate::sweeper::SweepSummary;

#[derive(Debug, Deserialize)]
pub struct CountryRevenue {
    pub country_code: String,
    pub revenue_usd: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct LocationConversionRequest {
    pub period: String,
    pub revenues: Vec<CountryRevenue>,
}

// admin-triggered; safe to re-run for the same period, already-settled
// users and completed pools are skipped
pub async fn run_location_conversion(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LocationConversionRequest>,
) -> Result<Json<BatchSummary>> {
    let revenues: Vec<(String, Decimal)> = req
        .revenues
        .into_iter()
        .map(|r| (r.country_code, r.revenue_usd))
        .collect();

    let summary = state
        .conversion
        .process_location_revenue(&req.period, &revenues)
        .await?;

    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct GlobalConversionRequest {
    pub period: String,
    pub revenue_usd: Decimal,
}

pub async fn run_global_conversion(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GlobalConversionRequest>,
) -> Result<Json<BatchSummary>> {
    let summary = state
        .conversion
        .process_global_revenue(&req.period, req.revenue_usd)
        .await?;

    Ok(Json(summary))
}

pub async fn get_pool(
    State(state): State<Arc<AppState>>,
    Path((country_code, period)): Path<(String, String)>,
) -> Result<Json<RevenuePool>> {
    let pool = state.conversion.get_pool(&country_code, &period).await?;

    Ok(Json(pool))
}

pub async fn run_sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepSummary>> {
    let summary = state.sweeper.sweep_once(Utc::now()).await?;

    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: String,
    #[serde(default)]
    pub coins_delta: i64,
    #[serde(default)]
    pub cash_delta_usd: Decimal,
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct AdjustmentResponse {
    pub transaction: LedgerTransaction,
}

pub async fn record_adjustment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdjustmentRequest>,
) -> Result<Json<AdjustmentResponse>> {
    let transaction = state
        .ledger
        .record_adjustment(
            &req.user_id,
            req.coins_delta,
            req.cash_delta_usd,
            Some(&req.note),
            Some("admin_note"),
        )
        .await?;

    let event = AuditEvent::AdminAdjustment {
        user_id: req.user_id,
        coins_delta: req.coins_delta,
        cash_delta_usd: req.cash_delta_usd,
        note: req.note,
    };
    if let Err(e) = state.audit.record(&event).await {
        tracing::error!("Failed to write adjustment audit entry: {}", e);
    }

    Ok(Json(AdjustmentResponse { transaction }))
}

#[derive(Debug, Deserialize)]
pub struct BadgeRewardRequest {
    pub user_id: String,
    pub badge_id: String,
    pub coins: i64,
}

pub async fn grant_badge_reward(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BadgeRewardRequest>,
) -> Result<Json<AdjustmentResponse>> {
    let transaction = state
        .ledger
        .award_coins(
            &req.user_id,
            req.coins,
            TransactionType::BadgeReward,
            Some(&req.badge_id),
            Some("badge"),
        )
        .await?;

    Ok(Json(AdjustmentResponse { transaction }))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

pub async fn get_audit_log(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<AuditQuery>,
) -> Result<Json<Vec<AuditRecord>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state.audit.recent(limit).await?;

    Ok(Json(records))
}

// replay check exposed for operators; inconsistency here means a ledger bug
pub async fn reconcile_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ReconcileReport>> {
    let report = state.ledger.reconcile(&user_id).await?;

    Ok(Json(report))
}
