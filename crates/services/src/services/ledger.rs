//! Hand-off of earned ZLTO to the wallet that pays it out. Credits are issued after the
//! completion has committed; a failed credit is logged and never rolls the completion back.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("reward credit failed: {0}")]
    Credit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RewardRole {
    Referee,
    Referrer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardCredit {
    pub usage_id: Uuid,
    pub program_id: Uuid,
    pub user_id: Uuid,
    pub role: RewardRole,
    pub amount: Decimal,
}

#[async_trait]
pub trait RewardLedger: Send + Sync {
    async fn credit(&self, credit: &RewardCredit) -> Result<(), LedgerError>;
}

/// Logs each credit; stands in until a wallet integration is configured
pub struct LogLedger;

#[async_trait]
impl RewardLedger for LogLedger {
    async fn credit(&self, credit: &RewardCredit) -> Result<(), LedgerError> {
        info!(
            usage_id = %credit.usage_id,
            program_id = %credit.program_id,
            user_id = %credit.user_id,
            role = %credit.role,
            amount = %credit.amount,
            "Reward credited"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct RewardService {
    ledger: Arc<dyn RewardLedger>,
}

impl Default for RewardService {
    fn default() -> Self {
        Self::new(Arc::new(LogLedger))
    }
}

impl RewardService {
    pub fn new(ledger: Arc<dyn RewardLedger>) -> Self {
        Self { ledger }
    }

    /// Credit each non-zero payout; failures are logged and the rest still go out
    pub async fn credit_all(&self, credits: Vec<RewardCredit>) {
        for credit in credits.iter().filter(|c| c.amount > Decimal::ZERO) {
            if let Err(e) = self.ledger.credit(credit).await {
                warn!(
                    usage_id = %credit.usage_id,
                    user_id = %credit.user_id,
                    role = %credit.role,
                    amount = %credit.amount,
                    error = %e,
                    "Failed to credit reward"
                );
            }
        }
    }
}
