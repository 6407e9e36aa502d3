use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditService};
use crate::db::models::LedgerTransaction;
use crate::error::{Result, RewardsError};
use crate::ledger::Ledger;
use crate::rates::RateCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSubmission {
    pub batch_id: String,
    pub status: String,
}

/// The payment provider boundary. Implementations are external, fallible
/// network calls; their failures must never corrupt the Ledger.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn create_payout(
        &self,
        recipient: &str,
        amount: Decimal,
        currency: &str,
        note: &str,
    ) -> Result<PayoutSubmission>;

    async fn get_payout_status(&self, batch_id: &str) -> Result<String>;
}

pub struct HttpPayoutClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPayoutClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatePayoutRequest<'a> {
    recipient: &'a str,
    amount: Decimal,
    currency: &'a str,
    note: &'a str,
}

#[derive(Debug, Deserialize)]
struct PayoutStatusResponse {
    status: String,
}

#[async_trait]
impl PayoutProvider for HttpPayoutClient {
    async fn create_payout(
        &self,
        recipient: &str,
        amount: Decimal,
        currency: &str,
        note: &str,
    ) -> Result<PayoutSubmission> {
        let response = self
            .client
            .post(format!("{}/v1/payouts", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&CreatePayoutRequest { recipient, amount, currency, note })
            .send()
            .await
            .map_err(|e| RewardsError::PayoutProvider(e.to_string()))?
            .error_for_status()
            .map_err(|e| RewardsError::PayoutProvider(e.to_string()))?;

        response
            .json::<PayoutSubmission>()
            .await
            .map_err(|e| RewardsError::PayoutProvider(format!("malformed payout response: {e}")))
    }

    async fn get_payout_status(&self, batch_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/v1/payouts/{}", self.base_url, batch_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| RewardsError::PayoutProvider(e.to_string()))?
            .error_for_status()
            .map_err(|e| RewardsError::PayoutProvider(e.to_string()))?;

        Ok(response
            .json::<PayoutStatusResponse>()
            .await
            .map_err(|e| RewardsError::PayoutProvider(format!("malformed status response: {e}")))?
            .status)
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalReceipt {
    pub batch_id: String,
    pub provider_status: String,
    pub amount_usd: Decimal,
    pub payout_amount: Decimal,
    pub currency: String,
    pub transaction: LedgerTransaction,
}

pub struct WithdrawalService {
    ledger: Arc<Ledger>,
    rates: Arc<RateCache>,
    audit: Arc<AuditService>,
    provider: Arc<dyn PayoutProvider>,
    min_withdrawal_usd: Decimal,
}

impl WithdrawalService {
    pub fn new(
        ledger: Arc<Ledger>,
        rates: Arc<RateCache>,
        audit: Arc<AuditService>,
        provider: Arc<dyn PayoutProvider>,
        min_withdrawal_usd: Decimal,
    ) -> Self {
        Self { ledger, rates, audit, provider, min_withdrawal_usd }
    }

    /// Order matters: the payout is submitted first, and the Ledger debit
    /// happens only after submission initiates successfully. A provider
    /// failure therefore leaves the balance untouched and retryable.
    pub async fn withdraw(
        &self,
        user_id: &str,
        amount_usd: Decimal,
        currency: &str,
        recipient: &str,
    ) -> Result<WithdrawalReceipt> {
        if recipient.trim().is_empty() {
            return Err(RewardsError::InvalidInput("recipient must not be empty".to_string()));
        }
        if amount_usd < self.min_withdrawal_usd {
            return Err(RewardsError::InvalidInput(format!(
                "minimum withdrawal is {} USD, got {amount_usd}",
                self.min_withdrawal_usd
            )));
        }

        // fast balance check; process_withdrawal re-checks under the row lock
        let wallet = self.ledger.get_wallet(user_id).await?;
        if wallet.cash_balance_usd < amount_usd {
            return Err(RewardsError::InsufficientCash {
                available: wallet.cash_balance_usd.to_string(),
                requested: amount_usd.to_string(),
            });
        }

        let currency = currency.to_uppercase();
        let payout_amount = (amount_usd * self.rates.rate(&currency)).round_dp(2);

        let note = format!("rewards withdrawal for {user_id}");
        let submission = self
            .provider
            .create_payout(recipient, payout_amount, &currency, &note)
            .await?;

        let transaction = match self
            .ledger
            .process_withdrawal(user_id, amount_usd, &submission.batch_id)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                // the payout is already submitted; this needs an operator
                tracing::error!(
                    user_id,
                    batch_id = %submission.batch_id,
                    "Ledger debit failed after payout submission: {}", e
                );
                return Err(e);
            }
        };

        let event = AuditEvent::WithdrawalInitiated {
            user_id: user_id.to_string(),
            amount_usd,
            currency: currency.clone(),
            batch_id: submission.batch_id.clone(),
        };
        if let Err(e) = self.audit.record(&event).await {
            tracing::error!("Failed to write withdrawal audit entry: {}", e);
        }

        Ok(WithdrawalReceipt {
            batch_id: submission.batch_id,
            provider_status: submission.status,
            amount_usd,
            payout_amount,
            currency,
            transaction,
        })
    }

    pub async fn payout_status(&self, batch_id: &str) -> Result<String> {
        self.provider.get_payout_status(batch_id).await
    }
}
