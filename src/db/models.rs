use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserWallet {
    pub user_id: String,
    // coins stored as BIGINT; cash as NUMERIC so ledger replay reproduces
    // balances exactly - no float drift allowed anywhere in the money path
    pub coins_balance: i64,
    pub cash_balance_usd: Decimal,
    pub total_coins_earned: i64,
    pub total_cash_earned_usd: Decimal,
    pub total_withdrawn_usd: Decimal,
    pub vpn_suspicion_score: i32,
    pub suspicious_activity_flag: bool,
    pub revenue_countries: Vec<String>,
    pub daily_videos_watched: i32,
    pub forced_interstitials_watched: i32,
    pub interstitial_unlock_remaining: i32,
    pub last_cap_reset_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    CoinEarn,
    CoinConversion,
    Withdrawal,
    AdminAdjustment,
    BadgeReward,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerTransaction {
    pub id: i64,
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub coins_delta: i64,
    pub cash_delta_usd: Decimal,
    // snapshots of the wallet immediately after this entry committed
    pub coins_balance_after: i64,
    pub cash_balance_after_usd: Decimal,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdView {
    pub id: i64,
    pub user_id: String,
    // ad-network-reported country - authoritative for revenue attribution
    pub country_code: String,
    // IP-derived country - fraud comparison only, never revenue
    pub ip_country: Option<String>,
    pub coins_earned: i64,
    pub estimated_earnings_usd: Option<Decimal>,
    pub completed: bool,
    pub converted: bool,
    pub pool_id: Option<i64>,
    pub admob_impression_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "pool_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Processing,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RevenuePool {
    pub id: i64,
    pub country_code: String,
    pub period: String,
    pub admob_revenue_usd: Decimal,
    pub total_coins_issued: i64,
    pub user_share_usd: Decimal,
    // fixed once computed, applied uniformly to every user in the pool
    pub conversion_rate: Decimal,
    pub status: PoolStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversionDetail {
    pub id: i64,
    pub pool_id: i64,
    pub user_id: String,
    pub coins_converted: i64,
    pub cash_usd: Decimal,
    pub transaction_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "session_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameSession {
    pub id: Uuid,
    pub user_id: String,
    pub status: SessionStatus,
    pub base_coins: i64,
    pub game_bonus: i64,
    pub games_played: i32,
    pub games_completed: i32,
    pub retry_ads_watched: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
