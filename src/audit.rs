use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::models::AuditRecord;
use crate::error::{Result, RewardsError};

/// Known audit-event shapes. The trail stays machine-checkable because
/// every writer goes through one of these variants rather than attaching
/// free-form JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ConversionBatch {
        period: String,
        countries_processed: Vec<String>,
        countries_skipped: Vec<String>,
        countries_failed: Vec<String>,
        users_paid: i64,
        total_cash_usd: Decimal,
    },
    BalanceExpirySweep {
        coin_wallets_zeroed: i64,
        coins_zeroed: i64,
        cash_wallets_zeroed: i64,
        cash_zeroed_usd: Decimal,
    },
    AdminAdjustment {
        user_id: String,
        coins_delta: i64,
        cash_delta_usd: Decimal,
        note: String,
    },
    WithdrawalInitiated {
        user_id: String,
        amount_usd: Decimal,
        currency: String,
        batch_id: String,
    },
}

impl AuditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::ConversionBatch { .. } => "conversion_batch",
            AuditEvent::BalanceExpirySweep { .. } => "balance_expiry_sweep",
            AuditEvent::AdminAdjustment { .. } => "admin_adjustment",
            AuditEvent::WithdrawalInitiated { .. } => "withdrawal_initiated",
        }
    }
}

pub struct AuditService {
    db_pool: PgPool,
}

impl AuditService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn record(&self, event: &AuditEvent) -> Result<()> {
        let payload = serde_json::to_value(event)
            .map_err(|e| RewardsError::Internal(format!("Failed to serialize audit event: {e}")))?;

        sqlx::query(r#"INSERT INTO public.audit_log (event_type, payload) VALUES ($1, $2)"#)
            .bind(event.event_type())
            .bind(payload)
            .execute(&self.db_pool)
            .await
            .map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let records = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT * FROM public.audit_log
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| RewardsError::Database(e.to_string()))?;

        Ok(records)
    }
}
