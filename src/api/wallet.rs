use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::db::models::{LedgerTransaction, UserWallet};
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct EnsureWalletRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct EnsureWalletResponse {
    pub wallet: UserWallet,
    pub created: bool,
}

// invoked at identity provisioning; safe to call again, the upsert makes
// concurrent first-requests race cleanly
pub async fn ensure_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnsureWalletRequest>,
) -> Result<Json<EnsureWalletResponse>> {
    let (wallet, created) = state.ledger.ensure_wallet(&req.user_id).await?;

    Ok(Json(EnsureWalletResponse { wallet, created }))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub wallet: UserWallet,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>> {
    let wallet = state.ledger.get_wallet(&user_id).await?;

    Ok(Json(BalanceResponse { wallet }))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<LedgerTransaction>,
}

pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let transactions = state.ledger.get_transactions(&user_id, limit).await?;

    Ok(Json(TransactionsResponse { transactions }))
}
