use std::env;

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    // revenue conversion
    pub revenue_share_ratio: Decimal,
    pub conversion_timeout_seconds: u64,

    // fraud gates
    pub max_ads_per_day: i64,
    pub velocity_window_seconds: i64,
    pub max_ads_per_window: i64,
    pub vpn_suspicion_threshold: i32,
    pub max_revenue_countries: usize,

    // video/session caps
    pub daily_video_limit: i32,
    pub interstitial_interval: i32,
    pub interstitial_unlock: i32,
    pub daily_session_limit: i64,
    pub session_cooldown_minutes: i64,

    // reward amounts
    pub coins_per_ad: i64,
    pub session_base_coins: i64,
    pub game_bonus_per_completion: i64,
    pub retry_ad_bonus: i64,

    // balance expiry
    pub coin_expiry_days: i64,
    pub cash_expiry_days: i64,
    pub sweep_interval_seconds: u64,

    // currency rates
    pub rate_feed_url: Option<String>,
    pub rate_refresh_seconds: u64,

    // payouts
    pub payout_api_url: String,
    pub payout_api_key: String,
    pub min_withdrawal_usd: Decimal,

    // geo dataset
    pub geoip_csv_path: Option<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {}={}: {}", key, raw, e))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // treating empty DATABASE_URL as unset because docker-compose sets it to ""
        let mut database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        // fallback to loading the crate-local .env in case the working directory differs
        if database_url.is_none() {
            let env_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
            let _ = dotenvy::from_path_override(&env_path);
            database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        }

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", "8080")?,
            database_url: database_url.ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?,

            revenue_share_ratio: env_or("REVENUE_SHARE_RATIO", "0.85")?,
            conversion_timeout_seconds: env_or("CONVERSION_TIMEOUT_SECONDS", "300")?,

            max_ads_per_day: env_or("MAX_ADS_PER_DAY", "200")?,
            velocity_window_seconds: env_or("VELOCITY_WINDOW_SECONDS", "300")?,
            max_ads_per_window: env_or("MAX_ADS_PER_WINDOW", "10")?,
            vpn_suspicion_threshold: env_or("VPN_SUSPICION_THRESHOLD", "10")?,
            max_revenue_countries: env_or("MAX_REVENUE_COUNTRIES", "5")?,

            daily_video_limit: env_or("DAILY_VIDEO_LIMIT", "20")?,
            interstitial_interval: env_or("INTERSTITIAL_INTERVAL", "20")?,
            interstitial_unlock: env_or("INTERSTITIAL_UNLOCK", "2")?,
            daily_session_limit: env_or("DAILY_SESSION_LIMIT", "20")?,
            session_cooldown_minutes: env_or("SESSION_COOLDOWN_MINUTES", "15")?,

            coins_per_ad: env_or("COINS_PER_AD", "10")?,
            session_base_coins: env_or("SESSION_BASE_COINS", "100")?,
            game_bonus_per_completion: env_or("GAME_BONUS_PER_COMPLETION", "10")?,
            retry_ad_bonus: env_or("RETRY_AD_BONUS", "5")?,

            coin_expiry_days: env_or("COIN_EXPIRY_DAYS", "90")?,
            cash_expiry_days: env_or("CASH_EXPIRY_DAYS", "365")?,
            sweep_interval_seconds: env_or("SWEEP_INTERVAL_SECONDS", "86400")?,

            rate_feed_url: env::var("RATE_FEED_URL").ok().filter(|v| !v.trim().is_empty()),
            rate_refresh_seconds: env_or("RATE_REFRESH_SECONDS", "3600")?,

            payout_api_url: env::var("PAYOUT_API_URL")
                .unwrap_or_else(|_| "https://api.payouts.example.com".to_string()),
            payout_api_key: env::var("PAYOUT_API_KEY").unwrap_or_default(),
            min_withdrawal_usd: env_or("MIN_WITHDRAWAL_USD", "5.0")?,

            geoip_csv_path: env::var("GEOIP_CSV_PATH").ok().filter(|v| !v.trim().is_empty()),
        })
    }
}
