use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::caps::{CapEngine, CapStatus};
use crate::db::models::{AdView, LedgerTransaction, TransactionType};
use crate::error::{Result, RewardsError};
use crate::fraud::{FraudEngine, GateReport};
use crate::ledger::Ledger;

#[derive(Debug)]
pub struct AdViewSubmission {
    pub user_id: String,
    pub country_code: String,
    pub admob_impression_id: Option<String>,
    pub estimated_earnings_usd: Option<Decimal>,
    pub coins_earned: Option<i64>,
    pub client_ip: Option<IpAddr>,
}

#[derive(Debug, Serialize)]
pub struct AdViewOutcome {
    pub ad_view: AdView,
    pub transaction: LedgerTransaction,
    pub cap: CapStatus,
    pub gates: GateReport,
}

/// The gated award path: cap engine, fraud gates, then one atomic unit
/// writing the ad view and its coin award together. Suspicion scoring runs
/// after the commit and can never take the reward back.
pub struct RewardService {
    db_pool: PgPool,
    ledger: Arc<Ledger>,
    fraud: Arc<FraudEngine>,
    caps: Arc<CapEngine>,
    coins_per_ad: i64,
}

impl RewardService {
    pub fn new(
        db_pool: PgPool,
        ledger: Arc<Ledger>,
        fraud: Arc<FraudEngine>,
        caps: Arc<CapEngine>,
        coins_per_ad: i64,
    ) -> Self {
        Self { db_pool, ledger, fraud, caps, coins_per_ad }
    }

    pub async fn submit_ad_view(&self, submission: AdViewSubmission) -> Result<AdViewOutcome> {
        let country_code = submission.country_code.trim().to_uppercase();
        if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RewardsError::InvalidInput(format!(
                "country_code must be a two-letter code, got {:?}",
                submission.country_code
            )));
        }

        let coins = submission.coins_earned.unwrap_or(self.coins_per_ad);
        if coins <= 0 {
            return Err(RewardsError::InvalidInput(format!(
                "coins_earned must be positive, got {coins}"
            )));
        }

        let now = Utc::now();

        // read-only fraud gates first so a rejection doesn't burn a video
        // slot; the cap gate then consumes one atomically
        let gates = self
            .fraud
            .check_gates(&submission.user_id, submission.admob_impression_id.as_deref(), now)
            .await?;
        let cap = self.caps.register_video(&submission.user_id, now).await?;

        let ip_country = self.fraud.resolve_ip_country(submission.client_ip);

        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let ad_view = sqlx::query_as::<_, AdView>(
            r#"
            INSERT INTO public.ad_views (
                user_id, country_code, ip_country, coins_earned,
                estimated_earnings_usd, admob_impression_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&submission.user_id)
        .bind(&country_code)
        .bind(&ip_country)
        .bind(coins)
        .bind(submission.estimated_earnings_usd)
        .bind(&submission.admob_impression_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // the unique constraint backstops the proactive duplicate check
            if e.as_database_error().map(|d| d.is_unique_violation()).unwrap_or(false) {
                RewardsError::DuplicateImpression(
                    submission.admob_impression_id.clone().unwrap_or_default(),
                )
            } else {
                RewardsError::Database(e.to_string())
            }
        })?;

        let ad_view_ref = ad_view.id.to_string();
        let transaction = self
            .ledger
            .award_coins_in(
                &mut tx,
                &submission.user_id,
                coins,
                TransactionType::CoinEarn,
                Some(ad_view_ref.as_str()),
                Some("ad_view"),
            )
            .await?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        // VPN mismatch and country tracking never block or roll back the
        // award above
        self.fraud
            .score_best_effort(&submission.user_id, &country_code, ip_country.as_deref())
            .await;

        tracing::info!(
            user_id = %submission.user_id,
            ad_view_id = ad_view.id,
            coins,
            country = %country_code,
            "Ad view rewarded"
        );

        Ok(AdViewOutcome { ad_view, transaction, cap, gates })
    }

    pub async fn record_interstitial(&self, user_id: &str) -> Result<CapStatus> {
        self.caps.record_interstitial(user_id, Utc::now()).await
    }
}
