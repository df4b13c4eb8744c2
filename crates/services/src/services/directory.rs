//! Lookup seam for the platform entities the referral engine reads but does not own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{
    opportunity::{Opportunity, OpportunityVerification},
    user::User,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::error::ReferralError;

#[async_trait]
pub trait ReferralDirectory: Send + Sync {
    /// Opportunity with its countries, `None` when it does not exist
    async fn opportunity(&self, id: Uuid) -> Result<Option<Opportunity>, ReferralError>;

    /// When the user's completion of the opportunity was verified, if it was
    async fn opportunity_completion(
        &self,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, ReferralError>;

    async fn user(&self, id: Uuid) -> Result<Option<User>, ReferralError>;
}

/// Directory backed by the read-model tables in the referral database
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn lookup_error(e: sqlx::Error) -> ReferralError {
    ReferralError::Lookup(e.to_string())
}

#[async_trait]
impl ReferralDirectory for SqliteDirectory {
    async fn opportunity(&self, id: Uuid) -> Result<Option<Opportunity>, ReferralError> {
        Opportunity::find_by_id(&self.pool, id)
            .await
            .map_err(lookup_error)
    }

    async fn opportunity_completion(
        &self,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, ReferralError> {
        let verification =
            OpportunityVerification::find_completed(&self.pool, user_id, opportunity_id)
                .await
                .map_err(lookup_error)?;
        Ok(verification.map(|v| v.date_completed))
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, ReferralError> {
        User::find_by_id(&self.pool, id).await.map_err(lookup_error)
    }
}
