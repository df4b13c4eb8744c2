//! Scheduled sweeps that move referral records along once time or program health says so.
//!
//! Each sweep takes a named job lock (skipping the run when another holder has it) and
//! works in batches until nothing matches or its execution budget runs out.

use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use db::{
    DBService,
    models::{
        program::{Program, ProgramStatus},
        referral_link::{ReferralLink, ReferralLinkStatus},
        referral_link_usage::ReferralLinkUsage,
    },
};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    config::ScheduleJobOptions,
    directory::ReferralDirectory,
    eligibility,
    error::ReferralError,
    locks::KeyedLocks,
    notification::{Notification, NotificationService, NotificationType, Recipient},
};

/// Recorded as the modifying user on status changes made by the sweeps
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

const LINK_USAGE_EXPIRATION_LOCK: &str = "referral_link_usage_process_expiration";
const PROGRAM_EXPIRATION_LOCK: &str = "referral_program_process_expiration";
const PROGRAM_EXPIRATION_NOTIFICATION_LOCK: &str =
    "referral_program_process_expiration_notifications";
const PROGRAM_HEALTH_LOCK: &str = "referral_program_process_health";
const PROGRAM_DELETION_LOCK: &str = "referral_program_process_deletion";

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Referral(#[from] ReferralError),
}

fn execute_until(options: &ScheduleJobOptions) -> DateTime<Utc> {
    Utc::now() + Duration::minutes(options.max_execution_minutes)
}

/// Expires pending usages whose completion window has run out
#[derive(Clone)]
pub struct LinkUsageBackgroundService {
    db: DBService,
    locks: KeyedLocks,
    options: ScheduleJobOptions,
}

impl LinkUsageBackgroundService {
    pub fn new(db: DBService, locks: KeyedLocks, options: ScheduleJobOptions) -> Self {
        Self { db, locks, options }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.start().await;
        })
    }

    async fn start(&self) {
        let poll_interval = StdDuration::from_secs(self.options.poll_interval_seconds);
        info!(
            "Starting link usage background service with interval {:?}",
            poll_interval
        );

        let mut interval = interval(poll_interval);
        loop {
            interval.tick().await;
            self.process_expiration().await;
        }
    }

    /// Returns how many usages were expired; failures are logged and end the run early
    pub async fn process_expiration(&self) -> u64 {
        let Some(_guard) = self.locks.try_lock(LINK_USAGE_EXPIRATION_LOCK) else {
            debug!("Link usage expiration already running; skipping");
            return 0;
        };

        let mut expired = 0;
        if let Err(e) = self.expire_batches(execute_until(&self.options), &mut expired).await {
            error!("Error expiring referral link usages: {}", e);
        }
        if expired > 0 {
            info!(expired, "Referral link usages expired");
        }
        expired
    }

    async fn expire_batches(
        &self,
        execute_until: DateTime<Utc>,
        expired: &mut u64,
    ) -> Result<(), BackgroundError> {
        while Utc::now() < execute_until {
            let now = Utc::now();
            let items = ReferralLinkUsage::find_expirable(
                &self.db.pool,
                now,
                self.options.link_usage_expiration_batch_size,
            )
            .await?;
            if items.is_empty() {
                break;
            }

            let mut tx = self.db.pool.begin().await?;
            for usage in &items {
                *expired += ReferralLinkUsage::mark_expired(&mut *tx, usage.id, now).await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }
}

/// Program lifecycle sweeps: end-date expiry, pathway health and auto-deletion
#[derive(Clone)]
pub struct ProgramBackgroundService {
    db: DBService,
    directory: Arc<dyn ReferralDirectory>,
    notifications: NotificationService,
    locks: KeyedLocks,
    options: ScheduleJobOptions,
}

impl ProgramBackgroundService {
    pub fn new(
        db: DBService,
        directory: Arc<dyn ReferralDirectory>,
        notifications: NotificationService,
        locks: KeyedLocks,
        options: ScheduleJobOptions,
    ) -> Self {
        Self {
            db,
            directory,
            notifications,
            locks,
            options,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.start().await;
        })
    }

    async fn start(&self) {
        let poll_interval = StdDuration::from_secs(self.options.poll_interval_seconds);
        info!(
            "Starting program background service with interval {:?}, grace period: {} days, \
             deletion after: {} days",
            poll_interval,
            self.options.program_health_grace_period_days,
            self.options.program_deletion_interval_days
        );

        let mut interval = interval(poll_interval);
        loop {
            interval.tick().await;
            self.process_expiration_notifications().await;
            self.process_expiration().await;
            self.process_health().await;
            self.process_deletion().await;
        }
    }

    fn admin_notification(
        kind: NotificationType,
        program: &Program,
        message: String,
    ) -> Notification {
        Notification {
            kind,
            recipient: Recipient::Administrators,
            subject: format!("Referral program '{}'", program.name),
            message,
        }
    }

    /// Expire the program and close out its links and pending usages in one transaction
    async fn expire_program(
        &self,
        program_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), BackgroundError> {
        let mut tx = self.db.pool.begin().await?;
        Program::update_status(&mut *tx, program_id, ProgramStatus::Expired, SYSTEM_USER_ID)
            .await?;
        let links =
            ReferralLink::close_by_program_id(&mut *tx, program_id, ReferralLinkStatus::Expired)
                .await?;
        let usages =
            ReferralLinkUsage::expire_pending_by_program_id(&mut *tx, program_id, now).await?;
        tx.commit().await?;

        info!(
            program_id = %program_id,
            links_expired = links,
            usages_expired = usages,
            "Program expired"
        );
        Ok(())
    }

    /// Tells the admins once about each program whose end date falls within the
    /// notification interval. Returns the number of programs announced.
    pub async fn process_expiration_notifications(&self) -> u64 {
        let Some(_guard) = self.locks.try_lock(PROGRAM_EXPIRATION_NOTIFICATION_LOCK) else {
            debug!("Program expiration notifications already running; skipping");
            return 0;
        };

        let mut expiring = Vec::new();
        if let Err(e) = self.announce_batches(execute_until(&self.options), &mut expiring).await {
            error!("Error processing referral program expiration notifications: {}", e);
        }

        let count = expiring.len() as u64;
        self.notifications
            .notify_all(
                expiring
                    .iter()
                    .map(|p| {
                        let date_end = p
                            .date_end
                            .map(|end| end.format("%Y-%m-%d").to_string())
                            .unwrap_or_default();
                        Self::admin_notification(
                            NotificationType::ProgramExpiringSoon,
                            p,
                            format!("Program '{}' will expire on '{}'", p.name, date_end),
                        )
                    })
                    .collect(),
            )
            .await;
        count
    }

    async fn announce_batches(
        &self,
        execute_until: DateTime<Utc>,
        expiring: &mut Vec<Program>,
    ) -> Result<(), BackgroundError> {
        while Utc::now() < execute_until {
            let now = Utc::now();
            let window_end =
                now + Duration::days(self.options.program_expiration_notification_interval_days);
            let items = Program::find_expiring(
                &self.db.pool,
                now,
                window_end,
                self.options.program_expiration_batch_size,
            )
            .await?;
            if items.is_empty() {
                break;
            }

            let mut tx = self.db.pool.begin().await?;
            for program in &items {
                Program::mark_expiration_notified(&mut *tx, program.id, now).await?;
            }
            tx.commit().await?;
            expiring.extend(items);
        }
        Ok(())
    }

    /// Programs past their end date become `Expired`. Returns the number expired.
    pub async fn process_expiration(&self) -> u64 {
        let Some(_guard) = self.locks.try_lock(PROGRAM_EXPIRATION_LOCK) else {
            debug!("Program expiration already running; skipping");
            return 0;
        };

        let mut expired = Vec::new();
        if let Err(e) = self.expire_batches(execute_until(&self.options), &mut expired).await {
            error!("Error expiring referral programs: {}", e);
        }

        let count = expired.len() as u64;
        self.notifications
            .notify_all(
                expired
                    .iter()
                    .map(|p| {
                        Self::admin_notification(
                            NotificationType::ProgramExpired,
                            p,
                            format!(
                                "Program '{}' reached its end date and has expired",
                                p.name
                            ),
                        )
                    })
                    .collect(),
            )
            .await;
        count
    }

    async fn expire_batches(
        &self,
        execute_until: DateTime<Utc>,
        expired: &mut Vec<Program>,
    ) -> Result<(), BackgroundError> {
        while Utc::now() < execute_until {
            let now = Utc::now();
            let items = Program::find_expirable(
                &self.db.pool,
                now,
                self.options.program_expiration_batch_size,
            )
            .await?;
            if items.is_empty() {
                break;
            }
            for program in items {
                self.expire_program(program.id, now).await?;
                expired.push(program);
            }
        }
        Ok(())
    }

    /// Re-checks pathway completability of active and un-completable programs. Returns
    /// the number of programs whose status changed.
    pub async fn process_health(&self) -> u64 {
        let Some(_guard) = self.locks.try_lock(PROGRAM_HEALTH_LOCK) else {
            debug!("Program health check already running; skipping");
            return 0;
        };

        let mut changed = 0;
        let mut notifications = Vec::new();
        if let Err(e) = self
            .health_check_batches(execute_until(&self.options), &mut changed, &mut notifications)
            .await
        {
            error!("Error probing referral program health: {}", e);
        }
        self.notifications.notify_all(notifications).await;
        changed
    }

    async fn health_check_batches(
        &self,
        execute_until: DateTime<Utc>,
        changed: &mut u64,
        notifications: &mut Vec<Notification>,
    ) -> Result<(), BackgroundError> {
        let mut after_id = None;
        while Utc::now() < execute_until {
            let items = Program::find_for_health_check(
                &self.db.pool,
                after_id,
                self.options.program_health_batch_size,
            )
            .await?;
            let Some(last) = items.last() else { break };
            after_id = Some(last.id);

            for program in items {
                match self.check_health(&program).await {
                    Ok(Some(notification)) => {
                        if notification.kind != NotificationType::ProgramUnCompletableWarning {
                            *changed += 1;
                        }
                        notifications.push(notification);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        program_id = %program.id,
                        error = %e,
                        "Program health check failed"
                    ),
                }
            }
        }
        Ok(())
    }

    /// Health transition for one program, returning the notification it warrants
    async fn check_health(
        &self,
        program: &Program,
    ) -> Result<Option<Notification>, BackgroundError> {
        let Some(full) = Program::find_with_pathway(&self.db.pool, program.id).await? else {
            return Ok(None);
        };
        let eligibility = eligibility::evaluate_program(self.directory.as_ref(), &full).await?;
        let completability = eligibility::program_completability(eligibility.as_ref());
        let now = Utc::now();

        match program.status {
            ProgramStatus::Active if !completability.is_completable => {
                Program::update_status(
                    &self.db.pool,
                    program.id,
                    ProgramStatus::UnCompletable,
                    SYSTEM_USER_ID,
                )
                .await?;
                let reason = completability.non_completable_reason.unwrap_or_default();
                info!(program_id = %program.id, reason = %reason, "Program marked un-completable");
                Ok(Some(Self::admin_notification(
                    NotificationType::ProgramUnCompletable,
                    program,
                    format!(
                        "Program '{}' can no longer be completed: {}",
                        program.name, reason
                    ),
                )))
            }
            ProgramStatus::UnCompletable if completability.is_completable => {
                if program.date_end.is_some_and(|end| end <= now) {
                    self.expire_program(program.id, now).await?;
                    return Ok(Some(Self::admin_notification(
                        NotificationType::ProgramExpired,
                        program,
                        format!(
                            "Program '{}' reached its end date and has expired",
                            program.name
                        ),
                    )));
                }

                if program.completion_limit_reached() {
                    let mut tx = self.db.pool.begin().await?;
                    Program::update_status(
                        &mut *tx,
                        program.id,
                        ProgramStatus::LimitReached,
                        SYSTEM_USER_ID,
                    )
                    .await?;
                    ReferralLink::update_active_by_program_id(
                        &mut *tx,
                        program.id,
                        ReferralLinkStatus::LimitReached,
                    )
                    .await?;
                    tx.commit().await?;
                    info!(
                        program_id = %program.id,
                        "Restored program has reached its completion limit"
                    );
                } else {
                    Program::update_status(
                        &self.db.pool,
                        program.id,
                        ProgramStatus::Active,
                        SYSTEM_USER_ID,
                    )
                    .await?;
                    info!(program_id = %program.id, "Program completable again; reactivated");
                }
                Ok(Some(Self::admin_notification(
                    NotificationType::ProgramRestored,
                    program,
                    format!("Program '{}' can be completed again", program.name),
                )))
            }
            ProgramStatus::UnCompletable => {
                let grace = Duration::days(self.options.program_health_grace_period_days);
                let expires_at = program.updated_at + grace;
                if expires_at <= now {
                    self.expire_program(program.id, now).await?;
                    return Ok(Some(Self::admin_notification(
                        NotificationType::ProgramExpired,
                        program,
                        format!(
                            "Program '{}' stayed un-completable beyond the grace period \
                             and has expired",
                            program.name
                        ),
                    )));
                }

                let warn_from =
                    expires_at - Duration::days(self.options.program_health_notification_days);
                if now >= warn_from && program.health_warning_sent_at.is_none() {
                    Program::mark_health_warning_sent(&self.db.pool, program.id, now).await?;
                    return Ok(Some(Self::admin_notification(
                        NotificationType::ProgramUnCompletableWarning,
                        program,
                        format!(
                            "Program '{}' is still un-completable and will expire on '{}'",
                            program.name,
                            expires_at.format("%Y-%m-%d")
                        ),
                    )));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Inactive or expired programs left untouched long enough are deleted. Returns the
    /// number deleted.
    pub async fn process_deletion(&self) -> u64 {
        let Some(_guard) = self.locks.try_lock(PROGRAM_DELETION_LOCK) else {
            debug!("Program deletion already running; skipping");
            return 0;
        };

        let mut deleted = 0;
        if let Err(e) = self.delete_batches(execute_until(&self.options), &mut deleted).await {
            error!("Error deleting referral programs: {}", e);
        }
        deleted
    }

    async fn delete_batches(
        &self,
        execute_until: DateTime<Utc>,
        deleted: &mut u64,
    ) -> Result<(), BackgroundError> {
        while Utc::now() < execute_until {
            let modified_before =
                Utc::now() - Duration::days(self.options.program_deletion_interval_days);
            let items = Program::find_deletable(
                &self.db.pool,
                modified_before,
                self.options.program_deletion_batch_size,
            )
            .await?;
            if items.is_empty() {
                break;
            }

            for program in items {
                let mut tx = self.db.pool.begin().await?;
                Program::update_status(
                    &mut *tx,
                    program.id,
                    ProgramStatus::Deleted,
                    SYSTEM_USER_ID,
                )
                .await?;
                if program.is_default {
                    Program::clear_default(&mut *tx, program.id, SYSTEM_USER_ID).await?;
                }
                let links = ReferralLink::close_by_program_id(
                    &mut *tx,
                    program.id,
                    ReferralLinkStatus::Cancelled,
                )
                .await?;
                tx.commit().await?;

                info!(program_id = %program.id, links_cancelled = links, "Program deleted");
                *deleted += 1;
            }
        }
        Ok(())
    }
}
