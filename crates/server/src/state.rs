use std::sync::Arc;

use db::DBService;
use services::services::{
    block::BlockService,
    config::ReferralConfig,
    directory::{ReferralDirectory, SqliteDirectory},
    ledger::{RewardLedger, RewardService},
    link::LinkService,
    link_usage::LinkUsageService,
    locks::KeyedLocks,
    notification::{NotificationDelivery, NotificationService},
    program::ProgramService,
};

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub directory: Arc<dyn ReferralDirectory>,
    pub notifications: NotificationService,
    pub locks: KeyedLocks,
    pub blocks: BlockService,
    pub programs: ProgramService,
    pub links: LinkService,
    pub usages: LinkUsageService,
}

impl AppState {
    pub fn new(
        db: DBService,
        config: &ReferralConfig,
        delivery: Arc<dyn NotificationDelivery>,
        ledger: Arc<dyn RewardLedger>,
    ) -> Self {
        let directory: Arc<dyn ReferralDirectory> =
            Arc::new(SqliteDirectory::new(db.pool.clone()));
        let notifications = NotificationService::new(delivery);
        let locks = KeyedLocks::new();

        Self {
            blocks: BlockService::new(db.clone(), directory.clone(), notifications.clone()),
            programs: ProgramService::new(db.clone(), directory.clone()),
            links: LinkService::new(db.clone(), directory.clone()),
            usages: LinkUsageService::new(
                db.clone(),
                directory.clone(),
                notifications.clone(),
                RewardService::new(ledger),
                locks.clone(),
                config.claim.clone(),
            ),
            db,
            directory,
            notifications,
            locks,
        }
    }
}
