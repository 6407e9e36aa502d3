use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{Result, RewardsError};
use crate::geo::GeoResolver;

#[derive(Debug, Clone)]
pub struct FraudPolicy {
    pub max_ads_per_day: i64,
    pub velocity_window_seconds: i64,
    pub max_ads_per_window: i64,
    pub vpn_suspicion_threshold: i32,
    pub max_revenue_countries: usize,
}

#[derive(Debug, Serialize)]
pub struct GateReport {
    pub ads_today: i64,
    pub remaining_today: i64,
}

/// What one scoring pass should do to the wallet. Pure so the threshold
/// arithmetic is testable without a database.
#[derive(Debug, PartialEq, Eq)]
pub struct ScoringOutcome {
    pub new_score: i32,
    pub set_flag: bool,
    pub append_country: bool,
}

pub fn evaluate_scoring(
    current_score: i32,
    current_flag: bool,
    known_countries: &[String],
    network_country: &str,
    ip_country: Option<&str>,
    policy: &FraudPolicy,
) -> ScoringOutcome {
    let mismatch = GeoResolver::countries_mismatch(ip_country, network_country);
    let new_score = if mismatch { current_score + 1 } else { current_score };

    let append_country = !known_countries
        .iter()
        .any(|c| c.eq_ignore_ascii_case(network_country));
    let country_count = known_countries.len() + usize::from(append_country);

    // the flag is sticky: once set it never clears
    let set_flag = current_flag
        || new_score >= policy.vpn_suspicion_threshold
        || country_count >= policy.max_revenue_countries;

    ScoringOutcome {
        new_score,
        set_flag,
        append_country,
    }
}

/// Inline gates ahead of every ad reward, plus the best-effort suspicion
/// scoring that runs after the award commits.
pub struct FraudEngine {
    db_pool: PgPool,
    geo: Arc<GeoResolver>,
    policy: FraudPolicy,
}

impl FraudEngine {
    pub fn new(db_pool: PgPool, geo: Arc<GeoResolver>, policy: FraudPolicy) -> Self {
        Self { db_pool, geo, policy }
    }

    pub fn resolve_ip_country(&self, ip: Option<IpAddr>) -> Option<String> {
        ip.and_then(|addr| self.geo.resolve_country(addr))
    }

    /// All gates must pass before an ad view is recorded. Rejections are
    /// policy outcomes carrying actionable detail, not faults.
    pub async fn check_gates(
        &self,
        user_id: &str,
        impression_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<GateReport> {
        // duplicate first: cheapest to answer and a hard conflict.
        // the unique constraint on ad_views is the backstop if two
        // submissions race past this check
        if let Some(impression) = impression_id {
            let exists = sqlx::query(
                r#"SELECT 1 FROM public.ad_views WHERE admob_impression_id = $1 LIMIT 1"#,
            )
            .bind(impression)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RewardsError::Database(e.to_string()))?
            .is_some();

            if exists {
                return Err(RewardsError::DuplicateImpression(impression.to_string()));
            }
        }

        let ads_today: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM public.ad_views
            WHERE user_id = $1 AND created_at >= date_trunc('day', $2::timestamptz)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        if ads_today >= self.policy.max_ads_per_day {
            return Err(RewardsError::DailyCapReached {
                watched: ads_today,
                limit: self.policy.max_ads_per_day,
            });
        }

        // trailing window, not a bucket: every request looks back exactly
        // velocity_window_seconds from now
        let (in_window, oldest): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MIN(created_at)
            FROM public.ad_views
            WHERE user_id = $1 AND created_at > $2::timestamptz - make_interval(secs => $3)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(self.policy.velocity_window_seconds as f64)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        if in_window >= self.policy.max_ads_per_window {
            let retry_after = oldest
                .map(|t| {
                    self.policy.velocity_window_seconds - (now - t).num_seconds()
                })
                .unwrap_or(self.policy.velocity_window_seconds)
                .max(1);

            return Err(RewardsError::VelocityExceeded {
                count: in_window,
                limit: self.policy.max_ads_per_window,
                window_seconds: self.policy.velocity_window_seconds,
                retry_after_seconds: retry_after,
            });
        }

        Ok(GateReport {
            ads_today,
            remaining_today: self.policy.max_ads_per_day - ads_today - 1,
        })
    }

    /// Fire-and-forget scoring: a failure here is logged and never fails or
    /// rolls back the award that triggered it.
    pub async fn score_best_effort(
        &self,
        user_id: &str,
        network_country: &str,
        ip_country: Option<&str>,
    ) {
        if let Err(e) = self.apply_scoring(user_id, network_country, ip_country).await {
            tracing::warn!(user_id, "Fraud scoring failed (reward already granted): {}", e);
        }
    }

    async fn apply_scoring(
        &self,
        user_id: &str,
        network_country: &str,
        ip_country: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let row: Option<(i32, bool, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT vpn_suspicion_score, suspicious_activity_flag, revenue_countries
            FROM public.user_wallets
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let (score, flag, countries) =
            row.ok_or_else(|| RewardsError::WalletNotFound(user_id.to_string()))?;

        let outcome = evaluate_scoring(
            score,
            flag,
            &countries,
            network_country,
            ip_country,
            &self.policy,
        );

        if outcome.set_flag && !flag {
            tracing::warn!(
                user_id,
                score = outcome.new_score,
                countries = countries.len() + usize::from(outcome.append_country),
                "Suspicious activity flag set"
            );
        }

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET vpn_suspicion_score = $1,
                suspicious_activity_flag = $2,
                revenue_countries = CASE WHEN $3 THEN array_append(revenue_countries, $4)
                                         ELSE revenue_countries END,
                updated_at = NOW()
            WHERE user_id = $5
            "#,
        )
        .bind(outcome.new_score)
        .bind(outcome.set_flag)
        .bind(outcome.append_country)
        .bind(network_country.to_uppercase())
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FraudPolicy {
        FraudPolicy {
            max_ads_per_day: 200,
            velocity_window_seconds: 300,
            max_ads_per_window: 10,
            vpn_suspicion_threshold: 10,
            max_revenue_countries: 5,
        }
    }

    #[test]
    fn mismatch_increments_score_without_blocking() {
        let out = evaluate_scoring(0, false, &[], "US", Some("DE"), &policy());
        assert_eq!(out.new_score, 1);
        assert!(!out.set_flag);
    }

    #[test]
    fn matching_or_unknown_ip_does_not_score() {
        let out = evaluate_scoring(3, false, &["US".into()], "US", Some("us"), &policy());
        assert_eq!(out.new_score, 3);

        let out = evaluate_scoring(3, false, &["US".into()], "US", None, &policy());
        assert_eq!(out.new_score, 3);
    }

    #[test]
    fn flag_sets_at_threshold_and_stays_sticky() {
        let out = evaluate_scoring(9, false, &[], "US", Some("DE"), &policy());
        assert_eq!(out.new_score, 10);
        assert!(out.set_flag);

        // already flagged stays flagged even with clean traffic
        let out = evaluate_scoring(0, true, &["US".into()], "US", Some("US"), &policy());
        assert!(out.set_flag);
    }

    #[test]
    fn fifth_distinct_country_sets_flag() {
        let known: Vec<String> = ["US", "DE", "FR", "IN"].iter().map(|s| s.to_string()).collect();

        let out = evaluate_scoring(0, false, &known, "BR", Some("BR"), &policy());
        assert!(out.append_country);
        assert!(out.set_flag);

        // repeat country appends nothing and does not flag
        let out = evaluate_scoring(0, false, &known, "de", Some("DE"), &policy());
        assert!(!out.append_country);
        assert!(!out.set_flag);
    }
}
