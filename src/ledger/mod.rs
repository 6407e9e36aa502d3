use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::models::{LedgerTransaction, TransactionType, UserWallet};
use crate::error::{Result, RewardsError};

/// The append-only money core. Every mutation is one atomic unit: lock the
/// wallet row, compute new balances, write the wallet, write exactly one
/// transaction row carrying post-mutation snapshots. Concurrent callers for
/// the same user serialize on the row lock; different users run in parallel.
pub struct Ledger {
    db_pool: PgPool,
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub user_id: String,
    pub coins_balance: i64,
    pub cash_balance_usd: Decimal,
    pub replayed_coins: i64,
    pub replayed_cash_usd: Decimal,
    pub consistent: bool,
}

impl Ledger {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Upsert-style creation so two concurrent first-requests can't both
    /// insert. Returns whether this call created the wallet.
    pub async fn ensure_wallet(&self, user_id: &str) -> Result<(UserWallet, bool)> {
        if user_id.trim().is_empty() {
            return Err(RewardsError::InvalidInput("user_id must not be empty".to_string()));
        }

        let inserted = sqlx::query(
            r#"INSERT INTO public.user_wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING"#,
        )
        .bind(user_id)
        .execute(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let created = inserted.rows_affected() == 1;
        let wallet = self.get_wallet(user_id).await?;

        if created {
            tracing::info!(user_id, "Wallet provisioned");
        }

        Ok((wallet, created))
    }

    pub async fn get_wallet(&self, user_id: &str) -> Result<UserWallet> {
        sqlx::query_as::<_, UserWallet>(r#"SELECT * FROM public.user_wallets WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RewardsError::Database(e.to_string()))?
            .ok_or_else(|| RewardsError::WalletNotFound(user_id.to_string()))
    }

    pub async fn get_transactions(&self, user_id: &str, limit: i64) -> Result<Vec<LedgerTransaction>> {
        let transactions = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT * FROM public.ledger_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(transactions)
    }

    pub async fn award_coins(
        &self,
        user_id: &str,
        amount: i64,
        transaction_type: TransactionType,
        reference_id: Option<&str>,
        reference_type: Option<&str>,
    ) -> Result<LedgerTransaction> {
        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;
        let entry = self
            .award_coins_in(&mut tx, user_id, amount, transaction_type, reference_id, reference_type)
            .await?;
        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        tracing::debug!(user_id, amount, entry_id = entry.id, "Coins awarded");
        Ok(entry)
    }

    /// Transaction-scoped variant so callers (session finish) can bundle
    /// their own state flip with the award in one atomic unit.
    pub(crate) async fn award_coins_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        amount: i64,
        transaction_type: TransactionType,
        reference_id: Option<&str>,
        reference_type: Option<&str>,
    ) -> Result<LedgerTransaction> {
        if amount <= 0 {
            return Err(RewardsError::InvalidInput(format!(
                "coin award must be positive, got {amount}"
            )));
        }
        if !matches!(
            transaction_type,
            TransactionType::CoinEarn | TransactionType::BadgeReward
        ) {
            return Err(RewardsError::InvalidInput(format!(
                "award_coins cannot record a {transaction_type:?} entry"
            )));
        }

        let wallet = Self::lock_wallet(tx, user_id).await?;
        let new_coins = wallet
            .coins_balance
            .checked_add(amount)
            .ok_or_else(|| RewardsError::Internal("coin balance overflow".to_string()))?;

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET coins_balance = $1,
                total_coins_earned = total_coins_earned + $2,
                last_activity_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(new_coins)
        .bind(amount)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let entry = Self::insert_entry(
            tx,
            user_id,
            transaction_type,
            amount,
            Decimal::ZERO,
            new_coins,
            wallet.cash_balance_usd,
            reference_id,
            reference_type,
        )
        .await?;

        Ok(entry)
    }

    /// Coin-to-cash settlement, transaction-scoped: the conversion engine
    /// bundles this wallet mutation with its conversion-detail and ad-view
    /// marking writes in one atomic unit per user.
    pub(crate) async fn convert_coins_to_cash_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        coins: i64,
        cash_usd: Decimal,
        pool_id: i64,
    ) -> Result<LedgerTransaction> {
        if coins <= 0 || cash_usd < Decimal::ZERO {
            return Err(RewardsError::InvalidInput(format!(
                "conversion requires positive coins and non-negative cash, got coins={coins} cash={cash_usd}"
            )));
        }

        let wallet = Self::lock_wallet(tx, user_id).await?;
        if wallet.coins_balance < coins {
            return Err(RewardsError::InsufficientCoins {
                available: wallet.coins_balance,
                requested: coins,
            });
        }

        let new_coins = wallet.coins_balance - coins;
        let new_cash = wallet.cash_balance_usd + cash_usd;

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET coins_balance = $1,
                cash_balance_usd = $2,
                total_cash_earned_usd = total_cash_earned_usd + $3,
                last_activity_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $4
            "#,
        )
        .bind(new_coins)
        .bind(new_cash)
        .bind(cash_usd)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let pool_ref = pool_id.to_string();
        let entry = Self::insert_entry(
            tx,
            user_id,
            TransactionType::CoinConversion,
            -coins,
            cash_usd,
            new_coins,
            new_cash,
            Some(pool_ref.as_str()),
            Some("revenue_pool"),
        )
        .await?;

        Ok(entry)
    }

    pub async fn process_withdrawal(
        &self,
        user_id: &str,
        amount_usd: Decimal,
        withdrawal_ref: &str,
    ) -> Result<LedgerTransaction> {
        if amount_usd <= Decimal::ZERO {
            return Err(RewardsError::InvalidInput(format!(
                "withdrawal amount must be positive, got {amount_usd}"
            )));
        }

        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let wallet = Self::lock_wallet(&mut tx, user_id).await?;
        if wallet.cash_balance_usd < amount_usd {
            return Err(RewardsError::InsufficientCash {
                available: wallet.cash_balance_usd.to_string(),
                requested: amount_usd.to_string(),
            });
        }

        let new_cash = wallet.cash_balance_usd - amount_usd;

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET cash_balance_usd = $1,
                total_withdrawn_usd = total_withdrawn_usd + $2,
                last_activity_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(new_cash)
        .bind(amount_usd)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let entry = Self::insert_entry(
            &mut tx,
            user_id,
            TransactionType::Withdrawal,
            0,
            -amount_usd,
            wallet.coins_balance,
            new_cash,
            Some(withdrawal_ref),
            Some("payout_batch"),
        )
        .await?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        tracing::info!(user_id, %amount_usd, withdrawal_ref, "Withdrawal debited");
        Ok(entry)
    }

    /// Signed adjustment used by admins and the expiry sweeper. Resulting
    /// balances must stay non-negative; a violation aborts with no effect.
    pub async fn record_adjustment(
        &self,
        user_id: &str,
        coins_delta: i64,
        cash_delta_usd: Decimal,
        reference_id: Option<&str>,
        reference_type: Option<&str>,
    ) -> Result<LedgerTransaction> {
        if coins_delta == 0 && cash_delta_usd == Decimal::ZERO {
            return Err(RewardsError::InvalidInput("adjustment must move something".to_string()));
        }

        let mut tx = self.db_pool.begin().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        let wallet = Self::lock_wallet(&mut tx, user_id).await?;

        let new_coins = wallet
            .coins_balance
            .checked_add(coins_delta)
            .ok_or_else(|| RewardsError::Internal("coin balance overflow".to_string()))?;
        if new_coins < 0 {
            return Err(RewardsError::InsufficientCoins {
                available: wallet.coins_balance,
                requested: -coins_delta,
            });
        }

        let new_cash = wallet.cash_balance_usd + cash_delta_usd;
        if new_cash < Decimal::ZERO {
            return Err(RewardsError::InsufficientCash {
                available: wallet.cash_balance_usd.to_string(),
                requested: (-cash_delta_usd).to_string(),
            });
        }

        // positive deltas also bump the monotonic earned counters so the
        // wallet's lifetime totals stay meaningful after manual credits
        let earned_coins = coins_delta.max(0);
        let earned_cash = if cash_delta_usd > Decimal::ZERO { cash_delta_usd } else { Decimal::ZERO };

        sqlx::query(
            r#"
            UPDATE public.user_wallets
            SET coins_balance = $1,
                cash_balance_usd = $2,
                total_coins_earned = total_coins_earned + $3,
                total_cash_earned_usd = total_cash_earned_usd + $4,
                updated_at = NOW()
            WHERE user_id = $5
            "#,
        )
        .bind(new_coins)
        .bind(new_cash)
        .bind(earned_coins)
        .bind(earned_cash)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let entry = Self::insert_entry(
            &mut tx,
            user_id,
            TransactionType::AdminAdjustment,
            coins_delta,
            cash_delta_usd,
            new_coins,
            new_cash,
            reference_id,
            reference_type,
        )
        .await?;

        tx.commit().await.map_err(|e| RewardsError::Database(e.to_string()))?;

        tracing::info!(user_id, coins_delta, %cash_delta_usd, "Adjustment recorded");
        Ok(entry)
    }

    /// Replays every ledger entry for the user from zero and compares the
    /// sums against the wallet row. Used by tests and the admin surface.
    pub async fn reconcile(&self, user_id: &str) -> Result<ReconcileReport> {
        let wallet = self.get_wallet(user_id).await?;

        // SUM over BIGINT comes back as NUMERIC, hence the cast
        let row: (Option<i64>, Option<Decimal>) = sqlx::query_as(
            r#"
            SELECT SUM(coins_delta)::BIGINT, SUM(cash_delta_usd)
            FROM public.ledger_transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        let replayed_coins = row.0.unwrap_or(0);
        let replayed_cash = row.1.unwrap_or(Decimal::ZERO);

        Ok(ReconcileReport {
            consistent: replayed_coins == wallet.coins_balance
                && replayed_cash == wallet.cash_balance_usd,
            user_id: wallet.user_id,
            coins_balance: wallet.coins_balance,
            cash_balance_usd: wallet.cash_balance_usd,
            replayed_coins,
            replayed_cash_usd: replayed_cash,
        })
    }

    async fn lock_wallet(tx: &mut Transaction<'_, Postgres>, user_id: &str) -> Result<UserWallet> {
        sqlx::query_as::<_, UserWallet>(
            r#"SELECT * FROM public.user_wallets WHERE user_id = $1 FOR UPDATE"#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?
        .ok_or_else(|| RewardsError::WalletNotFound(user_id.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        transaction_type: TransactionType,
        coins_delta: i64,
        cash_delta_usd: Decimal,
        coins_balance_after: i64,
        cash_balance_after_usd: Decimal,
        reference_id: Option<&str>,
        reference_type: Option<&str>,
    ) -> Result<LedgerTransaction> {
        let entry = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            INSERT INTO public.ledger_transactions (
                user_id,
                transaction_type,
                coins_delta,
                cash_delta_usd,
                coins_balance_after,
                cash_balance_after_usd,
                reference_id,
                reference_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(transaction_type)
        .bind(coins_delta)
        .bind(cash_delta_usd)
        .bind(coins_balance_after)
        .bind(cash_balance_after_usd)
        .bind(reference_id)
        .bind(reference_type)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(entry)
    }
}
