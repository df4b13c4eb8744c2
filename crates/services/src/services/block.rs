//! Administrative blocking of referrers. A blocked user cannot create links; blocking can
//! also cancel every active link they hold.

use std::sync::Arc;

use db::{
    DBService,
    models::{
        block::{Block, CreateBlock},
        referral_link::ReferralLink,
    },
};
use serde::Deserialize;
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    directory::ReferralDirectory,
    error::ReferralError,
    notification::{Notification, NotificationService, NotificationType, Recipient},
    validation::{validate_block, validate_unblock},
};

#[derive(Debug, Clone, Deserialize, TS)]
pub struct BlockRequest {
    pub user_id: Uuid,
    pub reason: String,
    pub comment: Option<String>,
    #[serde(default)]
    pub cancel_links: bool,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UnblockRequest {
    pub user_id: Uuid,
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct BlockService {
    db: DBService,
    directory: Arc<dyn ReferralDirectory>,
    notifications: NotificationService,
}

impl BlockService {
    pub fn new(
        db: DBService,
        directory: Arc<dyn ReferralDirectory>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db,
            directory,
            notifications,
        }
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<(), ReferralError> {
        match self.directory.user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(ReferralError::not_found("User", user_id)),
        }
    }

    pub async fn get_by_user(&self, user_id: Uuid) -> Result<Option<Block>, ReferralError> {
        self.ensure_user(user_id).await?;
        Ok(Block::find_active_by_user_id(&self.db.pool, user_id).await?)
    }

    /// Block a referrer. Blocking an already blocked user returns the existing block.
    pub async fn block(
        &self,
        actor_id: Uuid,
        request: BlockRequest,
    ) -> Result<Block, ReferralError> {
        validate_block(&request.reason, &request.comment).into_result()?;
        self.ensure_user(request.user_id).await?;

        let existing = Block::find_active_by_user_id(&self.db.pool, request.user_id).await?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let mut tx = self.db.pool.begin().await?;
        let block = Block::create(
            &mut *tx,
            Uuid::new_v4(),
            &CreateBlock {
                user_id: request.user_id,
                reason: request.reason,
                comment: request.comment,
            },
            actor_id,
        )
        .await?;
        ReferralLink::set_blocked_by_user_id(&mut *tx, request.user_id, Some(block.created_at))
            .await?;
        let cancelled = if request.cancel_links {
            ReferralLink::cancel_by_user_id(&mut *tx, request.user_id).await?
        } else {
            0
        };
        tx.commit().await?;

        info!(
            user_id = %block.user_id,
            block_id = %block.id,
            links_cancelled = cancelled,
            "Referrer blocked"
        );
        self.notifications
            .notify(Notification {
                kind: NotificationType::ReferralBlockedReferrer,
                recipient: Recipient::User(block.user_id),
                subject: "Referral links blocked".to_string(),
                message: format!(
                    "You can no longer create referral links. Reason: {}",
                    block.reason
                ),
            })
            .await;
        Ok(block)
    }

    /// Lift a referrer's block; a user who is not blocked is left as is
    pub async fn unblock(
        &self,
        actor_id: Uuid,
        request: UnblockRequest,
    ) -> Result<(), ReferralError> {
        validate_unblock(&request.comment).into_result()?;
        self.ensure_user(request.user_id).await?;

        let Some(block) = Block::find_active_by_user_id(&self.db.pool, request.user_id).await?
        else {
            return Ok(());
        };

        let mut tx = self.db.pool.begin().await?;
        Block::deactivate(&mut *tx, block.id, request.comment.as_deref(), actor_id).await?;
        ReferralLink::set_blocked_by_user_id(&mut *tx, request.user_id, None).await?;
        tx.commit().await?;

        info!(user_id = %request.user_id, block_id = %block.id, "Referrer unblocked");
        self.notifications
            .notify(Notification {
                kind: NotificationType::ReferralUnblockedReferrer,
                recipient: Recipient::User(request.user_id),
                subject: "Referral links unblocked".to_string(),
                message: "You can create referral links again".to_string(),
            })
            .await;
        Ok(())
    }
}
