use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::audit::{AuditEvent, AuditService};
use crate::error::{Result, RewardsError};
use crate::ledger::Ledger;

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub coin_expiry_days: i64,
    pub cash_expiry_days: i64,
}

#[derive(Debug, Serialize)]
pub struct SweepSummary {
    pub coin_wallets_zeroed: i64,
    pub coins_zeroed: i64,
    pub cash_wallets_zeroed: i64,
    pub cash_zeroed_usd: Decimal,
}

/// Zeroes balances that sat inactive past their grace period. Every zeroing
/// goes through a ledger adjustment so replaying the transaction log still
/// reproduces the wallet exactly; wallets themselves are never deleted.
pub struct BalanceExpirySweeper {
    db_pool: PgPool,
    ledger: Arc<Ledger>,
    audit: Arc<AuditService>,
    policy: SweepPolicy,
}

#[derive(sqlx::FromRow)]
struct ExpiredCoins {
    user_id: String,
    coins_balance: i64,
}

#[derive(sqlx::FromRow)]
struct ExpiredCash {
    user_id: String,
    cash_balance_usd: Decimal,
}

impl BalanceExpirySweeper {
    pub fn new(db_pool: PgPool, ledger: Arc<Ledger>, audit: Arc<AuditService>, policy: SweepPolicy) -> Self {
        Self { db_pool, ledger, audit, policy }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        tracing::info!("Running balance expiry sweep");

        let coin_cutoff = now - Duration::days(self.policy.coin_expiry_days);
        let cash_cutoff = now - Duration::days(self.policy.cash_expiry_days);

        let expired_coins = sqlx::query_as::<_, ExpiredCoins>(
            r#"
            SELECT user_id, coins_balance
            FROM public.user_wallets
            WHERE coins_balance > 0 AND last_activity_at < $1
            "#,
        )
        .bind(coin_cutoff)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let mut coin_wallets_zeroed = 0i64;
        let mut coins_zeroed = 0i64;
        for wallet in &expired_coins {
            // the adjustment re-reads under the row lock; a wallet that went
            // active again since the select simply fails here and is skipped
            match self
                .ledger
                .record_adjustment(
                    &wallet.user_id,
                    -wallet.coins_balance,
                    Decimal::ZERO,
                    Some("coin_expiry"),
                    Some("expiry_sweep"),
                )
                .await
            {
                Ok(_) => {
                    coin_wallets_zeroed += 1;
                    coins_zeroed += wallet.coins_balance;
                }
                Err(e) => {
                    tracing::warn!(user_id = %wallet.user_id, "Coin expiry skipped: {}", e)
                }
            }
        }

        let expired_cash = sqlx::query_as::<_, ExpiredCash>(
            r#"
            SELECT user_id, cash_balance_usd
            FROM public.user_wallets
            WHERE cash_balance_usd > 0 AND last_activity_at < $1
            "#,
        )
        .bind(cash_cutoff)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let mut cash_wallets_zeroed = 0i64;
        let mut cash_zeroed_usd = Decimal::ZERO;
        for wallet in &expired_cash {
            match self
                .ledger
                .record_adjustment(
                    &wallet.user_id,
                    0,
                    -wallet.cash_balance_usd,
                    Some("cash_expiry"),
                    Some("expiry_sweep"),
                )
                .await
            {
                Ok(_) => {
                    cash_wallets_zeroed += 1;
                    cash_zeroed_usd += wallet.cash_balance_usd;
                }
                Err(e) => {
                    tracing::warn!(user_id = %wallet.user_id, "Cash expiry skipped: {}", e)
                }
            }
        }

        let summary = SweepSummary {
            coin_wallets_zeroed,
            coins_zeroed,
            cash_wallets_zeroed,
            cash_zeroed_usd,
        };

        if coin_wallets_zeroed > 0 || cash_wallets_zeroed > 0 {
            let event = AuditEvent::BalanceExpirySweep {
                coin_wallets_zeroed,
                coins_zeroed,
                cash_wallets_zeroed,
                cash_zeroed_usd,
            };
            if let Err(e) = self.audit.record(&event).await {
                tracing::error!("Failed to write sweep audit entry: {}", e);
            }
        }

        tracing::info!(
            coin_wallets = summary.coin_wallets_zeroed,
            cash_wallets = summary.cash_wallets_zeroed,
            "Balance expiry sweep completed"
        );

        Ok(summary)
    }

    pub async fn run_periodic(&self, interval_seconds: u64) {
        loop {
            match self.sweep_once(Utc::now()).await {
                Ok(_) => {}
                Err(e) => tracing::error!("Balance expiry sweep failed: {}", e),
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(interval_seconds)).await;
        }
    }
}
