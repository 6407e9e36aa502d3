use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RewardsError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Wallet not found for user: {0}")]
    WalletNotFound(String),

    #[error("Insufficient coins: available={available}, requested={requested}")]
    InsufficientCoins { available: i64, requested: i64 },

    #[error("Insufficient cash balance: available={available}, requested={requested}")]
    InsufficientCash { available: String, requested: String },

    #[error("Daily ad limit reached: {watched}/{limit} today")]
    DailyCapReached { watched: i64, limit: i64 },

    #[error("Too many ads in the last {window_seconds}s: {count}/{limit}")]
    VelocityExceeded {
        count: i64,
        limit: i64,
        window_seconds: i64,
        retry_after_seconds: i64,
    },

    #[error("Duplicate impression: {0}")]
    DuplicateImpression(String),

    #[error("Interstitial required after {videos_watched} videos")]
    InterstitialRequired { videos_watched: i32 },

    #[error("Daily video limit reached: {watched}/{limit}")]
    VideoLimitReached { watched: i32, limit: i32 },

    #[error("Daily session limit reached: {completed}/{limit}")]
    SessionLimitReached { completed: i64, limit: i64 },

    #[error("Session cooldown active: {remaining_seconds}s remaining")]
    SessionCooldown { remaining_seconds: i64 },

    #[error("Game session not found: {0}")]
    SessionNotFound(String),

    #[error("Game session already completed: {0}")]
    SessionAlreadyCompleted(String),

    #[error("Rate feed error: {0}")]
    RateFeed(String),

    #[error("Payout provider error: {0}")]
    PayoutProvider(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for RewardsError {
    fn into_response(self) -> Response {
        // policy rejections get machine-readable bodies; faults get a
        // correlation id that shows up in logs for audit lookup
        let (status, error_message, extra) = match &self {
            RewardsError::Database(e) => {
                let correlation = Uuid::new_v4();
                tracing::error!(%correlation, "Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred",
                    json!({ "correlation_id": correlation }),
                )
            }
            RewardsError::InvalidInput(_) => {
                tracing::warn!("Invalid input: {}", self);
                (StatusCode::BAD_REQUEST, "Invalid input", json!({}))
            }
            RewardsError::WalletNotFound(_) => {
                tracing::warn!("Wallet not found: {}", self);
                (StatusCode::NOT_FOUND, "Wallet not found", json!({}))
            }
            RewardsError::InsufficientCoins { available, requested } => {
                tracing::warn!("Insufficient coins: {}", self);
                (
                    StatusCode::BAD_REQUEST,
                    "Insufficient coin balance",
                    json!({ "available": available, "requested": requested }),
                )
            }
            RewardsError::InsufficientCash { available, requested } => {
                tracing::warn!("Insufficient cash: {}", self);
                (
                    StatusCode::BAD_REQUEST,
                    "Insufficient cash balance",
                    json!({ "available": available, "requested": requested }),
                )
            }
            RewardsError::DailyCapReached { watched, limit } => {
                tracing::info!("Daily ad cap reached: {}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Daily ad limit reached",
                    json!({ "reason": "daily_cap", "watched": watched, "limit": limit, "remaining": 0 }),
                )
            }
            RewardsError::VelocityExceeded { count, limit, window_seconds, retry_after_seconds } => {
                tracing::info!("Velocity limit hit: {}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many ads too quickly",
                    json!({
                        "reason": "velocity",
                        "count": count,
                        "limit": limit,
                        "window_seconds": window_seconds,
                        "retry_after": retry_after_seconds,
                    }),
                )
            }
            RewardsError::DuplicateImpression(id) => {
                tracing::warn!("Duplicate impression: {}", id);
                (
                    StatusCode::CONFLICT,
                    "Impression already rewarded",
                    json!({ "reason": "duplicate_impression", "impression_id": id }),
                )
            }
            RewardsError::InterstitialRequired { videos_watched } => {
                tracing::info!("Interstitial owed: {}", self);
                (
                    StatusCode::FORBIDDEN,
                    "Interstitial required before next rewarded video",
                    json!({ "reason": "interstitial_required", "videos_watched": videos_watched }),
                )
            }
            RewardsError::VideoLimitReached { watched, limit } => {
                tracing::info!("Daily video limit reached: {}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Daily video limit reached",
                    json!({ "reason": "video_limit", "watched": watched, "limit": limit }),
                )
            }
            RewardsError::SessionLimitReached { completed, limit } => {
                tracing::info!("Daily session limit reached: {}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Daily game session limit reached",
                    json!({ "reason": "session_limit", "completed": completed, "limit": limit }),
                )
            }
            RewardsError::SessionCooldown { remaining_seconds } => {
                tracing::info!("Session cooldown: {}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Session cooldown active",
                    json!({ "reason": "cooldown", "retry_after": remaining_seconds }),
                )
            }
            RewardsError::SessionNotFound(_) => {
                tracing::warn!("Session not found: {}", self);
                (StatusCode::NOT_FOUND, "Game session not found", json!({}))
            }
            RewardsError::SessionAlreadyCompleted(_) => {
                tracing::warn!("Session already completed: {}", self);
                (StatusCode::CONFLICT, "Game session already completed", json!({}))
            }
            RewardsError::RateFeed(e) => {
                let correlation = Uuid::new_v4();
                tracing::error!(%correlation, "Rate feed error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Currency rate service unavailable",
                    json!({ "correlation_id": correlation, "retryable": true }),
                )
            }
            RewardsError::PayoutProvider(e) => {
                let correlation = Uuid::new_v4();
                tracing::error!(%correlation, "Payout provider error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payout provider unavailable",
                    json!({ "correlation_id": correlation, "retryable": true }),
                )
            }
            RewardsError::Internal(e) => {
                let correlation = Uuid::new_v4();
                tracing::error!(%correlation, "Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    json!({ "correlation_id": correlation }),
                )
            }
        };

        let mut body = json!({
            "error": error_message,
            "details": self.to_string(),
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for RewardsError {
    fn from(error: sqlx::Error) -> Self {
        RewardsError::Database(error.to_string())
    }
}

impl From<reqwest::Error> for RewardsError {
    fn from(error: reqwest::Error) -> Self {
        RewardsError::PayoutProvider(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RewardsError>;
