use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{GameSession, LedgerTransaction, SessionStatus, TransactionType};
use crate::error::{Result, RewardsError};
use crate::ledger::Ledger;

#[derive(Debug, Clone)]
pub struct GamePolicy {
    pub daily_session_limit: i64,
    pub session_cooldown_minutes: i64,
    pub session_base_coins: i64,
    pub game_bonus_per_completion: i64,
    pub retry_ad_bonus: i64,
}

/// Play-and-earn sessions: `active -> completed`, terminal. Coins accrue on
/// the session row while active and touch the Ledger exactly once, when the
/// session finishes.
pub struct GameSessionService {
    db_pool: PgPool,
    ledger: Arc<Ledger>,
    policy: GamePolicy,
}

impl GameSessionService {
    pub fn new(db_pool: PgPool, ledger: Arc<Ledger>, policy: GamePolicy) -> Self {
        Self { db_pool, ledger, policy }
    }

    /// Both gates run against completed history only; an abandoned active
    /// session neither counts toward the daily limit nor anchors a cooldown.
    pub async fn start_session(&self, user_id: &str, now: DateTime<Utc>) -> Result<GameSession> {
        // surface a clean NotFound instead of an FK violation
        self.ledger.get_wallet(user_id).await?;

        let completed_today: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM public.game_sessions
            WHERE user_id = $1
              AND status = 'completed'
              AND completed_at >= date_trunc('day', $2::timestamptz)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        if completed_today >= self.policy.daily_session_limit {
            return Err(RewardsError::SessionLimitReached {
                completed: completed_today,
                limit: self.policy.daily_session_limit,
            });
        }

        let last_completed: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(completed_at) FROM public.game_sessions
            WHERE user_id = $1 AND status = 'completed'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        if let Some(last) = last_completed {
            let ready_at = last + Duration::minutes(self.policy.session_cooldown_minutes);
            if now < ready_at {
                return Err(RewardsError::SessionCooldown {
                    remaining_seconds: (ready_at - now).num_seconds().max(1),
                });
            }
        }

        let session = sqlx::query_as::<_, GameSession>(
            r#"INSERT INTO public.game_sessions (user_id) VALUES ($1) RETURNING *"#,
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        tracing::debug!(user_id, session_id = %session.id, "Game session started");
        Ok(session)
    }

    /// Opt-in rewarded ad watched inside the session: accrues base coins on
    /// the row, no Ledger contact while active.
    pub async fn record_session_ad(&self, session_id: Uuid, user_id: &str) -> Result<GameSession> {
        self.accrue(
            session_id,
            user_id,
            r#"
            UPDATE public.game_sessions
            SET base_coins = base_coins + $3
            WHERE id = $1 AND user_id = $2 AND status = 'active'
            RETURNING *
            "#,
            self.policy.session_base_coins,
        )
        .await
    }

    pub async fn record_attempt(
        &self,
        session_id: Uuid,
        user_id: &str,
        completed: bool,
    ) -> Result<GameSession> {
        let bonus = if completed { self.policy.game_bonus_per_completion } else { 0 };

        let updated = sqlx::query_as::<_, GameSession>(
            r#"
            UPDATE public.game_sessions
            SET games_played = games_played + 1,
                games_completed = games_completed + CASE WHEN $3 THEN 1 ELSE 0 END,
                game_bonus = game_bonus + $4
            WHERE id = $1 AND user_id = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(completed)
        .bind(bonus)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        match updated {
            Some(session) => Ok(session),
            None => Err(self.classify_miss(session_id, user_id).await),
        }
    }

    /// Ad watched to retry a failed game: counted, small accrual.
    pub async fn record_retry_ad(&self, session_id: Uuid, user_id: &str) -> Result<GameSession> {
        self.accrue(
            session_id,
            user_id,
            r#"
            UPDATE public.game_sessions
            SET retry_ads_watched = retry_ads_watched + 1,
                base_coins = base_coins + $3
            WHERE id = $1 AND user_id = $2 AND status = 'active'
            RETURNING *
            "#,
            self.policy.retry_ad_bonus,
        )
        .await
    }

    /// The single payout point: flips the session to completed and pays
    /// `base_coins + game_bonus` through one ledger award, all in one
    /// transaction. A second finish call hits the status guard and is a
    /// conflict, never a double payment.
    pub async fn finish_session(
        &self,
        session_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(GameSession, Option<LedgerTransaction>)> {
        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let session = sqlx::query_as::<_, GameSession>(
            r#"SELECT * FROM public.game_sessions WHERE id = $1 AND user_id = $2 FOR UPDATE"#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?
        .ok_or_else(|| RewardsError::SessionNotFound(session_id.to_string()))?;

        if session.status == SessionStatus::Completed {
            return Err(RewardsError::SessionAlreadyCompleted(session_id.to_string()));
        }

        let total = session.base_coins + session.game_bonus;

        let session = sqlx::query_as::<_, GameSession>(
            r#"
            UPDATE public.game_sessions
            SET status = 'completed', completed_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        // a session with nothing accrued completes without a ledger entry
        let session_ref = session_id.to_string();
        let entry = if total > 0 {
            Some(
                self.ledger
                    .award_coins_in(
                        &mut tx,
                        user_id,
                        total,
                        TransactionType::CoinEarn,
                        Some(session_ref.as_str()),
                        Some("game_session"),
                    )
                    .await?,
            )
        } else {
            None
        };

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        tracing::info!(user_id, session_id = %session_id, coins = total, "Game session paid out");
        Ok((session, entry))
    }

    pub async fn get_session(&self, session_id: Uuid, user_id: &str) -> Result<GameSession> {
        sqlx::query_as::<_, GameSession>(
            r#"SELECT * FROM public.game_sessions WHERE id = $1 AND user_id = $2"#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?
        .ok_or_else(|| RewardsError::SessionNotFound(session_id.to_string()))
    }

    async fn accrue(
        &self,
        session_id: Uuid,
        user_id: &str,
        query: &str,
        amount: i64,
    ) -> Result<GameSession> {
        let updated = sqlx::query_as::<_, GameSession>(query)
            .bind(session_id)
            .bind(user_id)
            .bind(amount)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RewardsError::Database(e.to_string()))?;

        match updated {
            Some(session) => Ok(session),
            None => Err(self.classify_miss(session_id, user_id).await),
        }
    }

    /// A status-guarded update that matched nothing is either a missing
    /// session or a completed one; look once more to report which.
    async fn classify_miss(&self, session_id: Uuid, user_id: &str) -> RewardsError {
        match self.get_session(session_id, user_id).await {
            Ok(session) if session.status == SessionStatus::Completed => {
                RewardsError::SessionAlreadyCompleted(session_id.to_string())
            }
            Ok(_) => RewardsError::Internal(format!(
                "session {session_id} active but accrual matched no row"
            )),
            Err(e) => e,
        }
    }
}
