use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{Result, RewardsError};

#[derive(Debug, Clone)]
pub struct CapPolicy {
    pub daily_video_limit: i32,
    pub interstitial_interval: i32,
    pub interstitial_unlock: i32,
}

/// Per-user daily counters as read from the wallet row.
#[derive(Debug, Clone, Copy)]
pub struct CapCounters {
    pub videos_watched: i32,
    pub interstitials_watched: i32,
    pub unlock_remaining: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapDecision {
    Allow { consume_unlock: bool },
    NeedInterstitial,
    DailyLimitReached,
}

#[derive(Debug, Serialize)]
pub struct CapStatus {
    pub videos_watched_today: i32,
    pub remaining_today: i32,
    pub interstitials_watched_today: i32,
    pub interstitial_owed: bool,
}

/// Counters reset when the calendar date changes, not on a rolling 24h
/// window. The request that crosses the boundary is evaluated against the
/// fresh counters.
pub fn rolled_over(last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    last_reset.date_naive() != now.date_naive()
}

/// An interstitial is owed once the user has watched a full interval of
/// rewarded videos beyond what their interstitials cover. Unlock credits
/// (granted per interstitial watched) let a bounded number of views through
/// while the debt condition still holds.
pub fn interstitial_owed(counters: &CapCounters, policy: &CapPolicy) -> bool {
    counters.videos_watched - counters.interstitials_watched * policy.interstitial_interval
        >= policy.interstitial_interval
}

pub fn evaluate_video_request(counters: &CapCounters, policy: &CapPolicy) -> CapDecision {
    if counters.videos_watched >= policy.daily_video_limit {
        return CapDecision::DailyLimitReached;
    }

    if interstitial_owed(counters, policy) {
        if counters.unlock_remaining > 0 {
            return CapDecision::Allow { consume_unlock: true };
        }
        return CapDecision::NeedInterstitial;
    }

    CapDecision::Allow { consume_unlock: false }
}

pub struct CapEngine {
    db_pool: PgPool,
    policy: CapPolicy,
}

#[derive(sqlx::FromRow)]
struct CapRow {
    daily_videos_watched: i32,
    forced_interstitials_watched: i32,
    interstitial_unlock_remaining: i32,
    last_cap_reset_at: DateTime<Utc>,
}

impl CapEngine {
    pub fn new(db_pool: PgPool, policy: CapPolicy) -> Self {
        Self { db_pool, policy }
    }

    /// Gates one rewarded video and, when allowed, consumes it (increments
    /// the daily counter). Runs under the wallet row lock so a rapid
    /// double-submit can't both pass at the boundary.
    pub async fn register_video(&self, user_id: &str, now: DateTime<Utc>) -> Result<CapStatus> {
        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let mut counters = Self::lock_counters(&mut tx, user_id, now).await?;

        match evaluate_video_request(&counters, &self.policy) {
            CapDecision::DailyLimitReached => {
                // commit so a rollover applied above isn't lost with the rejection
                tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;
                return Err(RewardsError::VideoLimitReached {
                    watched: counters.videos_watched,
                    limit: self.policy.daily_video_limit,
                });
            }
            CapDecision::NeedInterstitial => {
                tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;
                return Err(RewardsError::InterstitialRequired {
                    videos_watched: counters.videos_watched,
                });
            }
            CapDecision::Allow { consume_unlock } => {
                counters.videos_watched += 1;
                if consume_unlock {
                    counters.unlock_remaining -= 1;
                }
            }
        }

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET daily_videos_watched = $1,
                interstitial_unlock_remaining = $2,
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(counters.videos_watched)
        .bind(counters.unlock_remaining)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(self.status_for(&counters))
    }

    /// Interstitials earn nothing; they pay down the debt and grant unlock
    /// credits for the next rewarded views.
    pub async fn record_interstitial(&self, user_id: &str, now: DateTime<Utc>) -> Result<CapStatus> {
        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let mut counters = Self::lock_counters(&mut tx, user_id, now).await?;
        counters.interstitials_watched += 1;
        counters.unlock_remaining = self.policy.interstitial_unlock;

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET forced_interstitials_watched = $1,
                interstitial_unlock_remaining = $2,
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(counters.interstitials_watched)
        .bind(counters.unlock_remaining)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(self.status_for(&counters))
    }

    /// Locks the wallet row and applies the date rollover before the caller
    /// evaluates anything, persisting the reset so it survives even if the
    /// request is subsequently rejected.
    async fn lock_counters(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CapCounters> {
        let row = sqlx::query_as::<_, CapRow>(
            r#"
            SELECT daily_videos_watched,
                   forced_interstitials_watched,
                   interstitial_unlock_remaining,
                   last_cap_reset_at
            FROM public.user_wallets
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?
        .ok_or_else(|| RewardsError::WalletNotFound(user_id.to_string()))?;

        if rolled_over(row.last_cap_reset_at, now) {
            sqlx::query(
                r#"
                UPDATE public.user_wallets
                SET daily_videos_watched = 0,
                    forced_interstitials_watched = 0,
                    interstitial_unlock_remaining = 0,
                    last_cap_reset_at = $1,
                    updated_at = NOW()
                WHERE user_id = $2
                "#,
            )
            .bind(now)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| RewardsError::Database(e.to_string()))?;

            return Ok(CapCounters {
                videos_watched: 0,
                interstitials_watched: 0,
                unlock_remaining: 0,
            });
        }

        Ok(CapCounters {
            videos_watched: row.daily_videos_watched,
            interstitials_watched: row.forced_interstitials_watched,
            unlock_remaining: row.interstitial_unlock_remaining,
        })
    }

    fn status_for(&self, counters: &CapCounters) -> CapStatus {
        CapStatus {
            videos_watched_today: counters.videos_watched,
            remaining_today: (self.policy.daily_video_limit - counters.videos_watched).max(0),
            interstitials_watched_today: counters.interstitials_watched,
            interstitial_owed: interstitial_owed(counters, &self.policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> CapPolicy {
        CapPolicy {
            daily_video_limit: 20,
            interstitial_interval: 20,
            interstitial_unlock: 2,
        }
    }

    fn counters(videos: i32, interstitials: i32, unlock: i32) -> CapCounters {
        CapCounters {
            videos_watched: videos,
            interstitials_watched: interstitials,
            unlock_remaining: unlock,
        }
    }

    #[test]
    fn daily_limit_boundary() {
        let p = policy();
        assert_eq!(
            evaluate_video_request(&counters(19, 0, 0), &p),
            CapDecision::Allow { consume_unlock: false }
        );
        assert_eq!(
            evaluate_video_request(&counters(20, 0, 0), &p),
            CapDecision::DailyLimitReached
        );
    }

    #[test]
    fn interstitial_owed_after_interval() {
        let p = CapPolicy {
            daily_video_limit: 50,
            interstitial_interval: 20,
            interstitial_unlock: 2,
        };

        assert_eq!(
            evaluate_video_request(&counters(19, 0, 0), &p),
            CapDecision::Allow { consume_unlock: false }
        );
        // 20 videos, zero interstitials: a full interval of debt
        assert_eq!(
            evaluate_video_request(&counters(20, 0, 0), &p),
            CapDecision::NeedInterstitial
        );
        // one interstitial covers the interval again
        assert_eq!(
            evaluate_video_request(&counters(20, 1, 2), &p),
            CapDecision::Allow { consume_unlock: false }
        );
        // debt again at 40, but unlock credits let views through
        assert_eq!(
            evaluate_video_request(&counters(40, 1, 2), &p),
            CapDecision::Allow { consume_unlock: true }
        );
        assert_eq!(
            evaluate_video_request(&counters(40, 1, 0), &p),
            CapDecision::NeedInterstitial
        );
    }

    #[test]
    fn rollover_compares_calendar_dates_not_elapsed_time() {
        let yesterday_late = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap();
        let today_early = Utc.with_ymd_and_hms(2025, 3, 2, 0, 1, 0).unwrap();
        let today_noon = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

        // two minutes apart but across midnight: reset
        assert!(rolled_over(yesterday_late, today_early));
        // twelve hours apart within one date: no reset
        assert!(!rolled_over(today_early, today_noon));
    }
}
