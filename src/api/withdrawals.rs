use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::error::Result;
use crate::payout::WithdrawalReceipt;

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub user_id: String,
    pub amount_usd: Decimal,
    // display/payout currency; balance stays USD-denominated
    pub currency: Option<String>,
    pub recipient: String,
}

pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<WithdrawalReceipt>> {
    let currency = req.currency.as_deref().unwrap_or("USD");

    let receipt = state
        .withdrawals
        .withdraw(&req.user_id, req.amount_usd, currency, &req.recipient)
        .await?;

    Ok(Json(receipt))
}

#[derive(Debug, Serialize)]
pub struct PayoutStatusResponse {
    pub batch_id: String,
    pub status: String,
}

pub async fn payout_status(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<PayoutStatusResponse>> {
    let status = state.withdrawals.payout_status(&batch_id).await?;

    Ok(Json(PayoutStatusResponse { batch_id, status }))
}
