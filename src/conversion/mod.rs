use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::audit::{AuditEvent, AuditService};
use crate::db::models::{PoolStatus, RevenuePool};
use crate::error::{Result, RewardsError};
use crate::ledger::Ledger;

/// Reserved bucket for the legacy global conversion path.
pub const GLOBAL_POOL_COUNTRY: &str = "GLOBAL";

#[derive(Debug, Clone)]
pub struct ConversionPolicy {
    pub revenue_share_ratio: Decimal,
    pub timeout_seconds: u64,
}

pub fn user_share(revenue_usd: Decimal, share_ratio: Decimal) -> Decimal {
    (revenue_usd * share_ratio).round_dp(6)
}

/// USD per coin, fixed once per pool. Stored and applied at 12 decimal
/// places so every user in the pool sees the identical rate.
pub fn conversion_rate(user_share_usd: Decimal, total_coins: i64) -> Option<Decimal> {
    if total_coins <= 0 {
        return None;
    }
    Some((user_share_usd / Decimal::from(total_coins)).round_dp(12))
}

/// Per-user payout: coins x rate, rounded to micro-USD. The sum across a
/// pool is not reconciled against user_share_usd; rounding drift stays with
/// the platform.
pub fn payout_for(coins: i64, rate: Decimal) -> Decimal {
    (Decimal::from(coins) * rate).round_dp(6)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountryStatus {
    Processed,
    SkippedEmpty,
    AlreadyCompleted,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct CountryOutcome {
    pub country_code: String,
    pub status: CountryStatus,
    pub pool_id: Option<i64>,
    pub conversion_rate: Option<Decimal>,
    pub users_paid: i64,
    pub users_skipped: i64,
    pub users_failed: i64,
    pub total_cash_usd: Decimal,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub period: String,
    pub outcomes: Vec<CountryOutcome>,
    pub users_paid: i64,
    pub total_cash_usd: Decimal,
}

/// Converts externally reported ad revenue into per-user cash. Each country
/// is one independently committed unit of work: the pool row bookends
/// (processing -> completed) a series of per-user atomic conversions, so a
/// mid-batch failure leaves a resumable `processing` pool and never touches
/// other countries' pools.
pub struct ConversionEngine {
    db_pool: PgPool,
    ledger: Arc<Ledger>,
    audit: Arc<AuditService>,
    policy: ConversionPolicy,
}

struct UserCoins {
    user_id: String,
    coins: i64,
}

impl ConversionEngine {
    pub fn new(
        db_pool: PgPool,
        ledger: Arc<Ledger>,
        audit: Arc<AuditService>,
        policy: ConversionPolicy,
    ) -> Self {
        Self { db_pool, ledger, audit, policy }
    }

    /// Location variant: one pool per reported country.
    pub async fn process_location_revenue(
        &self,
        period: &str,
        revenues: &[(String, Decimal)],
    ) -> Result<BatchSummary> {
        if period.trim().is_empty() {
            return Err(RewardsError::InvalidInput("period must not be empty".to_string()));
        }
        if revenues.is_empty() {
            return Err(RewardsError::InvalidInput("no revenue figures supplied".to_string()));
        }

        let timeout = tokio::time::Duration::from_secs(self.policy.timeout_seconds);
        match tokio::time::timeout(timeout, self.run_batch(period, revenues)).await {
            Ok(summary) => summary,
            // pools left `processing` at this point are resumable by re-invocation
            Err(_) => Err(RewardsError::Internal(format!(
                "conversion batch for period {period} timed out after {}s; completed pools are final, processing pools resume on re-run",
                self.policy.timeout_seconds
            ))),
        }
    }

    /// Legacy global variant: every country in one `GLOBAL` bucket.
    pub async fn process_global_revenue(&self, period: &str, revenue_usd: Decimal) -> Result<BatchSummary> {
        self.process_location_revenue(period, &[(GLOBAL_POOL_COUNTRY.to_string(), revenue_usd)])
            .await
    }

    pub async fn get_pool(&self, country_code: &str, period: &str) -> Result<RevenuePool> {
        sqlx::query_as::<_, RevenuePool>(
            r#"SELECT * FROM public.revenue_pools WHERE country_code = $1 AND period = $2"#,
        )
        .bind(country_code.to_uppercase())
        .bind(period)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?
        .ok_or_else(|| RewardsError::InvalidInput(format!(
            "no revenue pool for {country_code} / {period}"
        )))
    }

    async fn run_batch(&self, period: &str, revenues: &[(String, Decimal)]) -> Result<BatchSummary> {
        let mut outcomes = Vec::with_capacity(revenues.len());

        for (country_code, revenue_usd) in revenues {
            let outcome = match self.process_country(period, country_code, *revenue_usd).await {
                Ok(outcome) => outcome,
                // one country failing must not corrupt the others
                Err(e) => {
                    tracing::error!(country = %country_code, period, "Country conversion failed: {}", e);
                    CountryOutcome {
                        country_code: country_code.to_uppercase(),
                        status: CountryStatus::Failed,
                        pool_id: None,
                        conversion_rate: None,
                        users_paid: 0,
                        users_skipped: 0,
                        users_failed: 0,
                        total_cash_usd: Decimal::ZERO,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let users_paid: i64 = outcomes.iter().map(|o| o.users_paid).sum();
        let total_cash_usd: Decimal = outcomes.iter().map(|o| o.total_cash_usd).sum();

        let event = AuditEvent::ConversionBatch {
            period: period.to_string(),
            countries_processed: outcomes
                .iter()
                .filter(|o| o.status == CountryStatus::Processed)
                .map(|o| o.country_code.clone())
                .collect(),
            countries_skipped: outcomes
                .iter()
                .filter(|o| matches!(o.status, CountryStatus::SkippedEmpty | CountryStatus::AlreadyCompleted))
                .map(|o| o.country_code.clone())
                .collect(),
            countries_failed: outcomes
                .iter()
                .filter(|o| o.status == CountryStatus::Failed)
                .map(|o| o.country_code.clone())
                .collect(),
            users_paid,
            total_cash_usd,
        };
        if let Err(e) = self.audit.record(&event).await {
            tracing::error!("Failed to write conversion batch audit entry: {}", e);
        }

        tracing::info!(period, users_paid, %total_cash_usd, "Conversion batch finished");

        Ok(BatchSummary {
            period: period.to_string(),
            outcomes,
            users_paid,
            total_cash_usd,
        })
    }

    async fn process_country(
        &self,
        period: &str,
        country_code: &str,
        revenue_usd: Decimal,
    ) -> Result<CountryOutcome> {
        let country_code = country_code.trim().to_uppercase();
        if country_code.is_empty() {
            return Err(RewardsError::InvalidInput("country code must not be empty".to_string()));
        }
        if revenue_usd <= Decimal::ZERO {
            return Err(RewardsError::InvalidInput(format!(
                "revenue for {country_code} must be positive, got {revenue_usd}"
            )));
        }

        // an existing completed pool makes the whole country a no-op;
        // a processing pool is a previous run to resume at its fixed rate
        let existing = sqlx::query_as::<_, RevenuePool>(
            r#"SELECT * FROM public.revenue_pools WHERE country_code = $1 AND period = $2"#,
        )
        .bind(&country_code)
        .bind(period)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        if let Some(pool) = &existing {
            if pool.status == PoolStatus::Completed {
                tracing::info!(country = %country_code, period, pool_id = pool.id, "Pool already completed, skipping");
                return Ok(CountryOutcome {
                    country_code,
                    status: CountryStatus::AlreadyCompleted,
                    pool_id: Some(pool.id),
                    conversion_rate: Some(pool.conversion_rate),
                    users_paid: 0,
                    users_skipped: 0,
                    users_failed: 0,
                    total_cash_usd: Decimal::ZERO,
                    error: None,
                });
            }
        }

        let eligible = self.eligible_users(&country_code).await?;
        let total_coins: i64 = eligible.iter().map(|u| u.coins).sum();

        if eligible.is_empty() || total_coins == 0 {
            // an interrupted run can leave a processing pool with nothing
            // unconverted; finalize it rather than stranding it
            if let Some(pool) = existing {
                sqlx::query(
                    r#"
                    UPDATE public.revenue_pools
                    SET status = 'completed', processed_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(pool.id)
                .execute(&self.db_pool)
                .await
                .map_err(|e| RewardsError::Database(e.to_string()))?;

                return Ok(CountryOutcome {
                    country_code,
                    status: CountryStatus::Processed,
                    pool_id: Some(pool.id),
                    conversion_rate: Some(pool.conversion_rate),
                    users_paid: 0,
                    users_skipped: 0,
                    users_failed: 0,
                    total_cash_usd: Decimal::ZERO,
                    error: None,
                });
            }

            // valid outcome, not an error; no pool row is created
            tracing::info!(country = %country_code, period, "No eligible coins, skipping country");
            return Ok(CountryOutcome {
                country_code,
                status: CountryStatus::SkippedEmpty,
                pool_id: None,
                conversion_rate: None,
                users_paid: 0,
                users_skipped: 0,
                users_failed: 0,
                total_cash_usd: Decimal::ZERO,
                error: None,
            });
        }

        let pool = match existing {
            Some(pool) => pool,
            None => {
                let share = user_share(revenue_usd, self.policy.revenue_share_ratio);
                let rate = conversion_rate(share, total_coins)
                    .ok_or_else(|| RewardsError::Internal("zero-coin pool slipped through".to_string()))?;

                sqlx::query_as::<_, RevenuePool>(
                    r#"
                    INSERT INTO public.revenue_pools (
                        country_code, period, admob_revenue_usd,
                        total_coins_issued, user_share_usd, conversion_rate
                    )
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING *
                    "#,
                )
                .bind(&country_code)
                .bind(period)
                .bind(revenue_usd)
                .bind(total_coins)
                .bind(share)
                .bind(rate)
                .fetch_one(&self.db_pool)
                .await
                .map_err(|e| RewardsError::Database(e.to_string()))?
            }
        };

        tracing::info!(
            country = %country_code,
            period,
            pool_id = pool.id,
            total_coins,
            rate = %pool.conversion_rate,
            users = eligible.len(),
            "Distributing pool"
        );

        let mut users_paid = 0i64;
        let mut users_skipped = 0i64;
        let mut users_failed = 0i64;
        let mut total_cash = Decimal::ZERO;

        for user in &eligible {
            match self.convert_user(&pool, &user.user_id).await {
                Ok(Some(cash)) => {
                    users_paid += 1;
                    total_cash += cash;
                }
                Ok(None) => users_skipped += 1,
                Err(e) => {
                    users_failed += 1;
                    tracing::error!(
                        user_id = %user.user_id,
                        pool_id = pool.id,
                        "User conversion failed, pool stays processing: {}", e
                    );
                }
            }
        }

        // finalize only when every eligible user is settled; otherwise the
        // pool stays processing and a re-run picks up the unpaid remainder
        let status = if users_failed == 0 {
            sqlx::query(
                r#"
                UPDATE public.revenue_pools
                SET status = 'completed', processed_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(pool.id)
            .execute(&self.db_pool)
            .await
            .map_err(|e| RewardsError::Database(e.to_string()))?;
            CountryStatus::Processed
        } else {
            CountryStatus::Failed
        };

        Ok(CountryOutcome {
            country_code,
            status,
            pool_id: Some(pool.id),
            conversion_rate: Some(pool.conversion_rate),
            users_paid,
            users_skipped,
            users_failed,
            total_cash_usd: total_cash,
            error: (users_failed > 0).then(|| format!("{users_failed} user conversions failed")),
        })
    }

    /// Unconverted completed views grouped by user. The `GLOBAL` bucket
    /// spans every country.
    async fn eligible_users(&self, country_code: &str) -> Result<Vec<UserCoins>> {
        // SUM over BIGINT comes back as NUMERIC, hence the casts
        let rows: Vec<(String, Option<i64>)> = if country_code == GLOBAL_POOL_COUNTRY {
            sqlx::query_as(
                r#"
                SELECT user_id, SUM(coins_earned)::BIGINT
                FROM public.ad_views
                WHERE completed AND NOT converted
                GROUP BY user_id
                "#,
            )
            .fetch_all(&self.db_pool)
            .await
        } else {
            sqlx::query_as(
                r#"
                SELECT user_id, SUM(coins_earned)::BIGINT
                FROM public.ad_views
                WHERE country_code = $1 AND completed AND NOT converted
                GROUP BY user_id
                "#,
            )
            .bind(country_code)
            .fetch_all(&self.db_pool)
            .await
        }
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(user_id, coins)| UserCoins { user_id, coins: coins.unwrap_or(0) })
            .collect())
    }

    /// One user's settlement as one atomic unit: claim exactly their
    /// unconverted views for this pool's scope, debit those coins, credit
    /// cash at the pool rate, and link the detail row - all or nothing.
    /// Returns None when the user was already settled (idempotent re-run).
    async fn convert_user(&self, pool: &RevenuePool, user_id: &str) -> Result<Option<Decimal>> {
        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        // idempotency gate: checked before any ledger mutation
        let already: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status FROM public.conversion_details
            WHERE pool_id = $1 AND user_id = $2
            "#,
        )
        .bind(pool.id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        if let Some((status,)) = already {
            if status == "completed" {
                return Ok(None);
            }
        }

        // claiming via UPDATE .. RETURNING keeps the marked set and the
        // summed set identical even if new views land mid-batch
        let claimed: Vec<(i64,)> = if pool.country_code == GLOBAL_POOL_COUNTRY {
            sqlx::query_as(
                r#"
                UPDATE public.ad_views
                SET converted = TRUE, pool_id = $1
                WHERE user_id = $2 AND completed AND NOT converted
                RETURNING coins_earned
                "#,
            )
            .bind(pool.id)
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await
        } else {
            sqlx::query_as(
                r#"
                UPDATE public.ad_views
                SET converted = TRUE, pool_id = $1
                WHERE user_id = $2 AND country_code = $3 AND completed AND NOT converted
                RETURNING coins_earned
                "#,
            )
            .bind(pool.id)
            .bind(user_id)
            .bind(&pool.country_code)
            .fetch_all(&mut *tx)
            .await
        }
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let coins: i64 = claimed.iter().map(|(c,)| c).sum();
        if coins <= 0 {
            // nothing left to convert for this user (settled by an earlier run)
            return Ok(None);
        }

        let cash = payout_for(coins, pool.conversion_rate);

        let entry = self
            .ledger
            .convert_coins_to_cash_in(&mut tx, user_id, coins, cash, pool.id)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO public.conversion_details (pool_id, user_id, coins_converted, cash_usd, transaction_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(pool.id)
        .bind(user_id)
        .bind(coins)
        .bind(cash)
        .bind(entry.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(Some(cash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rate_matches_reported_revenue_split() {
        // three users with 100/200/300 coins, $10 reported, 85% share
        let share = user_share(dec!(10), dec!(0.85));
        assert_eq!(share, dec!(8.5));

        let rate = conversion_rate(share, 600).unwrap();
        assert_eq!(rate, dec!(0.014166666667));

        let payouts = [100i64, 200, 300].map(|coins| payout_for(coins, rate));
        assert_eq!(payouts[0], dec!(1.416667));
        assert_eq!(payouts[1], dec!(2.833333));
        assert_eq!(payouts[2], dec!(4.250000));

        // sum lands within rounding of the user share and is not corrected
        let total: Decimal = payouts.iter().copied().sum();
        assert!((share - total).abs() < dec!(0.001));
    }

    #[test]
    fn zero_coins_produces_no_rate() {
        assert!(conversion_rate(dec!(8.5), 0).is_none());
        assert!(conversion_rate(dec!(8.5), -5).is_none());
    }

    #[test]
    fn rate_is_uniform_across_users() {
        let rate = conversion_rate(dec!(100), 7).unwrap();
        let a = payout_for(3, rate);
        let b = payout_for(4, rate);
        // per-user rounding, identical rate: totals drift from the share
        // by strictly less than one micro-USD per user
        assert!((a + b - dec!(100)).abs() < dec!(0.000002));
    }
}
