use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use anyhow::Context;
use dotenvy as dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod audit;
mod caps;
mod config;
mod conversion;
mod db;
mod error;
mod fraud;
mod games;
mod geo;
mod ledger;
mod middleware;
mod payout;
mod rates;
mod rewards;
mod sweeper;

use audit::AuditService;
use caps::{CapEngine, CapPolicy};
use config::Config;
use conversion::{ConversionEngine, ConversionPolicy};
use fraud::{FraudEngine, FraudPolicy};
use games::{GamePolicy, GameSessionService};
use geo::GeoResolver;
use ledger::Ledger;
use middleware::RateLimitLayer;
use payout::{HttpPayoutClient, WithdrawalService};
use rates::RateCache;
use rewards::RewardService;
use sweeper::{BalanceExpirySweeper, SweepPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // trying multiple .env locations since working directory differs between dev and prod
    let _ = dotenv::from_filename_override(".env");
    let _ = dotenv::from_filename_override(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    let _ = dotenv::dotenv_override();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rewards_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rewards Settlement Backend");

    tracing::info!("Loading configuration from environment");
    let config = Config::from_env().context("error with configuration")?;
    tracing::info!("Configuration loaded successfully");

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Database connected successfully");

    let geo = Arc::new(match &config.geoip_csv_path {
        Some(path) => GeoResolver::from_csv_path(path).context("Failed to load geo dataset")?,
        None => {
            tracing::warn!("GEOIP_CSV_PATH not set; IP-country resolution disabled");
            GeoResolver::empty()
        }
    });

    let audit = Arc::new(AuditService::new(db_pool.clone()));
    let ledger = Arc::new(Ledger::new(db_pool.clone()));
    let rates = Arc::new(RateCache::new(config.rate_feed_url.clone()));

    let fraud = Arc::new(FraudEngine::new(
        db_pool.clone(),
        geo,
        FraudPolicy {
            max_ads_per_day: config.max_ads_per_day,
            velocity_window_seconds: config.velocity_window_seconds,
            max_ads_per_window: config.max_ads_per_window,
            vpn_suspicion_threshold: config.vpn_suspicion_threshold,
            max_revenue_countries: config.max_revenue_countries,
        },
    ));

    let caps = Arc::new(CapEngine::new(
        db_pool.clone(),
        CapPolicy {
            daily_video_limit: config.daily_video_limit,
            interstitial_interval: config.interstitial_interval,
            interstitial_unlock: config.interstitial_unlock,
        },
    ));

    let reward_service = Arc::new(RewardService::new(
        db_pool.clone(),
        ledger.clone(),
        fraud,
        caps,
        config.coins_per_ad,
    ));

    let games = Arc::new(GameSessionService::new(
        db_pool.clone(),
        ledger.clone(),
        GamePolicy {
            daily_session_limit: config.daily_session_limit,
            session_cooldown_minutes: config.session_cooldown_minutes,
            session_base_coins: config.session_base_coins,
            game_bonus_per_completion: config.game_bonus_per_completion,
            retry_ad_bonus: config.retry_ad_bonus,
        },
    ));

    let conversion = Arc::new(ConversionEngine::new(
        db_pool.clone(),
        ledger.clone(),
        audit.clone(),
        ConversionPolicy {
            revenue_share_ratio: config.revenue_share_ratio,
            timeout_seconds: config.conversion_timeout_seconds,
        },
    ));

    let payout_client = Arc::new(HttpPayoutClient::new(
        config.payout_api_url.clone(),
        config.payout_api_key.clone(),
    ));
    let withdrawals = Arc::new(WithdrawalService::new(
        ledger.clone(),
        rates.clone(),
        audit.clone(),
        payout_client,
        config.min_withdrawal_usd,
    ));

    let sweeper = Arc::new(BalanceExpirySweeper::new(
        db_pool.clone(),
        ledger.clone(),
        audit.clone(),
        SweepPolicy {
            coin_expiry_days: config.coin_expiry_days,
            cash_expiry_days: config.cash_expiry_days,
        },
    ));

    tracing::info!("Initializing rate limiting...");
    let redis_url = std::env::var("REDIS_URL").ok();

    let rate_limit_default = Arc::new(RateLimitLayer::with_defaults(redis_url.as_deref()).await);
    let rate_limit_read = Arc::new(RateLimitLayer::read_heavy(redis_url.as_deref()).await);
    let rate_limit_write = Arc::new(RateLimitLayer::write_heavy(redis_url.as_deref()).await);
    let rate_limit_admin = Arc::new(RateLimitLayer::admin(redis_url.as_deref()).await);

    tracing::info!("Rate limiting initialized successfully");

    // spawning background jobs before serving so they don't block startup
    if config.rate_feed_url.is_some() {
        let rates_clone = rates.clone();
        let refresh_secs = config.rate_refresh_seconds;
        tokio::spawn(async move {
            tracing::info!("Starting periodic currency rate refresh task");
            rates_clone.run_periodic_refresh(refresh_secs).await;
        });
    } else {
        tracing::warn!("RATE_FEED_URL not set; serving USD parity for all currencies (degraded)");
    }

    let sweeper_clone = sweeper.clone();
    let sweep_secs = config.sweep_interval_seconds;
    tokio::spawn(async move {
        tracing::info!("Starting periodic balance expiry sweep task");
        sweeper_clone.run_periodic(sweep_secs).await;
    });

    let app_state = Arc::new(AppState {
        config: config.clone(),
        ledger,
        reward_service,
        games,
        conversion,
        withdrawals,
        sweeper,
        rates,
        audit,
    });

    // grouping routes by rate limit tier to avoid repeating the middleware closure pattern everywhere
    let app = Router::new()
        .route("/health", get(api::health::health_check))
        .route("/config/public", get(api::health::public_config))

        .route("/wallet/ensure", post(api::wallet::ensure_wallet))
        .route_layer({
            let limiter = rate_limit_default.clone();
            axum_middleware::from_fn(move |headers, req, next| {
                let limiter = limiter.clone();
                async move { limiter.middleware(headers, req, next).await }
            })
        })

        .route("/rewards/ad-view", post(api::rewards::submit_ad_view))
        .route("/rewards/interstitial", post(api::rewards::record_interstitial))
        .route("/games/session/start", post(api::games::start_session))
        .route("/games/session/:id/ad", post(api::games::record_session_ad))
        .route("/games/session/:id/attempt", post(api::games::record_attempt))
        .route("/games/session/:id/retry-ad", post(api::games::record_retry_ad))
        .route("/games/session/:id/finish", post(api::games::finish_session))
        .route("/withdrawals", post(api::withdrawals::withdraw))
        .route_layer({
            let limiter = rate_limit_write.clone();
            axum_middleware::from_fn(move |headers, req, next| {
                let limiter = limiter.clone();
                async move { limiter.middleware(headers, req, next).await }
            })
        })

        .route("/wallet/balance/:user_id", get(api::wallet::get_balance))
        .route("/wallet/transactions/:user_id", get(api::wallet::get_transactions))
        .route("/games/session/:id/of/:user_id", get(api::games::get_session))
        .route("/withdrawals/status/:batch_id", get(api::withdrawals::payout_status))
        .route_layer({
            let limiter = rate_limit_read.clone();
            axum_middleware::from_fn(move |headers, req, next| {
                let limiter = limiter.clone();
                async move { limiter.middleware(headers, req, next).await }
            })
        })

        .route("/admin/conversion/location", post(api::admin::run_location_conversion))
        .route("/admin/conversion/global", post(api::admin::run_global_conversion))
        .route("/admin/pools/:country_code/:period", get(api::admin::get_pool))
        .route("/admin/sweep", post(api::admin::run_sweep))
        .route("/admin/adjustment", post(api::admin::record_adjustment))
        .route("/admin/badge", post(api::admin::grant_badge_reward))
        .route("/admin/reconcile/:user_id", get(api::admin::reconcile_user))
        .route("/admin/audit", get(api::admin::get_audit_log))
        .route_layer({
            let limiter = rate_limit_admin.clone();
            axum_middleware::from_fn(move |headers, req, next| {
                let limiter = limiter.clone();
                async move { limiter.middleware(headers, req, next).await }
            })
        })

        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // in case the configured port is taken, try a few more before giving up
    let mut port = config.port;
    let mut listener = None;

    for _ in 0..10u16 {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => {
                listener = Some((addr, l));
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to bind to {}: {} (trying next port)", addr, e);
                port = port.saturating_add(1);
            }
        }
    }

    let (addr, listener) = listener.ok_or_else(|| anyhow::anyhow!(
        "Failed to bind to any port in range {}..{}",
        config.port,
        config.port.saturating_add(9)
    ))?;

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ledger: Arc<Ledger>,
    pub reward_service: Arc<RewardService>,
    pub games: Arc<GameSessionService>,
    pub conversion: Arc<ConversionEngine>,
    pub withdrawals: Arc<WithdrawalService>,
    pub sweeper: Arc<BalanceExpirySweeper>,
    pub rates: Arc<RateCache>,
    pub audit: Arc<AuditService>,
}
