use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::db::models::{GameSession, LedgerTransaction};
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: GameSession,
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<SessionResponse>> {
    let session = state.games.start_session(&req.user_id, Utc::now()).await?;

    Ok(Json(SessionResponse { session }))
}

#[derive(Debug, Deserialize)]
pub struct SessionActionRequest {
    pub user_id: String,
}

pub async fn record_session_ad(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SessionActionRequest>,
) -> Result<Json<SessionResponse>> {
    let session = state.games.record_session_ad(session_id, &req.user_id).await?;

    Ok(Json(SessionResponse { session }))
}

#[derive(Debug, Deserialize)]
pub struct AttemptRequest {
    pub user_id: String,
    pub completed: bool,
}

pub async fn record_attempt(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AttemptRequest>,
) -> Result<Json<SessionResponse>> {
    let session = state
        .games
        .record_attempt(session_id, &req.user_id, req.completed)
        .await?;

    Ok(Json(SessionResponse { session }))
}

pub async fn record_retry_ad(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SessionActionRequest>,
) -> Result<Json<SessionResponse>> {
    let session = state.games.record_retry_ad(session_id, &req.user_id).await?;

    Ok(Json(SessionResponse { session }))
}

#[derive(Debug, Serialize)]
pub struct FinishSessionResponse {
    pub session: GameSession,
    pub coins_awarded: i64,
    pub transaction: Option<LedgerTransaction>,
}

pub async fn finish_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SessionActionRequest>,
) -> Result<Json<FinishSessionResponse>> {
    let (session, transaction) = state
        .games
        .finish_session(session_id, &req.user_id, Utc::now())
        .await?;

    Ok(Json(FinishSessionResponse {
        coins_awarded: transaction.as_ref().map(|t| t.coins_delta).unwrap_or(0),
        session,
        transaction,
    }))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path((session_id, user_id)): Path<(Uuid, String)>,
) -> Result<Json<SessionResponse>> {
    let session = state.games.get_session(session_id, &user_id).await?;

    Ok(Json(SessionResponse { session }))
}
