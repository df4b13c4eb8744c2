//! Referee side of a referral: claiming a link, reporting progress and the completion
//! trigger that pays out rewards.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use db::{
    DBService,
    models::{
        program::{Program, ProgramStatus, ProgramWithPathway},
        referral_link::{ReferralLink, ReferralLinkStatus},
        referral_link_usage::{
            ReferralLinkUsage, ReferralLinkUsageSearchFilter, ReferralLinkUsageSearchResults,
            ReferralLinkUsageStatus,
        },
    },
};
use rust_decimal::Decimal;
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    config::ClaimOptions,
    directory::ReferralDirectory,
    eligibility::{self, PathwayEligibility},
    error::{ReferralError, ValidationErrors},
    ledger::{RewardCredit, RewardRole, RewardService},
    locks::{KeyedLocks, program_completion_key, user_progress_key},
    notification::{Notification, NotificationService, NotificationType, Recipient},
    pathway_progress::{self, ProgramPathwayProgress, TaskFacts},
    reward::{self, RewardAllocation},
};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProofOfPersonhoodMethod {
    Otp,
    SocialLogin,
}

/// A usage with everything the referee needs to see how far along they are
#[derive(Debug, Clone, Serialize, TS)]
pub struct ReferralLinkUsageInfo {
    #[serde(flatten)]
    pub usage: ReferralLinkUsage,
    pub time_remaining_in_days: Option<i64>,
    pub date_complete_by: Option<DateTime<Utc>>,
    pub proof_of_personhood_required: bool,
    pub proof_of_personhood_methods: Vec<ProofOfPersonhoodMethod>,
    pub proof_of_personhood_completed: bool,
    pub pathway_required: bool,
    pub pathway_completed: Option<bool>,
    #[serde(skip)]
    pub proof_of_personhood_effective_completed: bool,
    #[serde(skip)]
    pub pathway_effective_completed: bool,
    #[ts(type = "number")]
    pub percent_complete: Decimal,
    pub pathway: Option<ProgramPathwayProgress>,
}

impl ReferralLinkUsageInfo {
    /// Every required gate is met; gates that are not required count as met
    pub fn gates_completed(&self) -> bool {
        self.proof_of_personhood_effective_completed && self.pathway_effective_completed
    }
}

/// Counts from one run of the completion trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
pub struct ProgressSummary {
    pub completed: usize,
    pub expired: usize,
    pub pending: usize,
}

struct Completion {
    usage_id: Uuid,
    program_id: Uuid,
    program_name: String,
    referee_id: Uuid,
    referrer_id: Uuid,
    allocation: RewardAllocation,
}

fn claim_rejected(message: impl Into<String>) -> ReferralError {
    let mut errors = ValidationErrors::new();
    errors.add("link_id", message);
    ReferralError::Validation(errors)
}

fn day(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn optional_day(date: Option<DateTime<Utc>>) -> String {
    date.map(day).unwrap_or_default()
}

fn window_elapsed(usage: &ReferralLinkUsage, window: Option<i32>, now: DateTime<Utc>) -> bool {
    window.is_some_and(|days| usage.date_claimed + Duration::days(days as i64) <= now)
}

#[derive(Clone)]
pub struct LinkUsageService {
    db: DBService,
    directory: Arc<dyn ReferralDirectory>,
    notifications: NotificationService,
    rewards: RewardService,
    locks: KeyedLocks,
    claim: ClaimOptions,
}

impl LinkUsageService {
    pub fn new(
        db: DBService,
        directory: Arc<dyn ReferralDirectory>,
        notifications: NotificationService,
        rewards: RewardService,
        locks: KeyedLocks,
        claim: ClaimOptions,
    ) -> Self {
        Self {
            db,
            directory,
            notifications,
            rewards,
            locks,
            claim,
        }
    }

    pub async fn claim_as_referee(
        &self,
        link_id: Uuid,
        user_id: Uuid,
    ) -> Result<ReferralLinkUsage, ReferralError> {
        let link = ReferralLink::find_by_id(&self.db.pool, link_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Referral link", link_id))?;
        let program = Program::find_by_id(&self.db.pool, link.program_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", link.program_id))?;
        let user = self
            .directory
            .user(user_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("User", user_id))?;
        let now = Utc::now();

        if link.user_id == user.id {
            return Err(claim_rejected("You cannot claim your own referral link"));
        }

        let Some(date_onboarded) = user.date_onboarded else {
            return Err(claim_rejected(
                "You must complete your profile before claiming a referral link",
            ));
        };
        if now - date_onboarded > Duration::minutes(self.claim.onboarding_window_minutes) {
            return Err(claim_rejected(
                "You are already registered. Registration with a referral link only applies \
                 to new registrations",
            ));
        }

        let usages = ReferralLinkUsage::find_by_user(&self.db.pool, user.id).await?;

        let mut other_programs: Vec<&str> = usages
            .iter()
            .filter(|u| u.program_id != program.id)
            .map(|u| u.program_name.as_str())
            .collect();
        other_programs.sort_unstable();
        other_programs.dedup();
        if !other_programs.is_empty() {
            return Err(claim_rejected(format!(
                "You have already participated in program(s) '{}' and cannot claim again.",
                other_programs.join(", ")
            )));
        }

        if let Some(existing) = usages.iter().find(|u| u.program_id == program.id) {
            if existing.link_id != link.id {
                return Err(ReferralError::DataInconsistency(format!(
                    "user '{}' already has a usage record for program '{}' linked to a \
                     different referral link '{}'",
                    user.id, program.id, existing.link_id
                )));
            }

            let prefix = format!(
                "You have already participated in program '{}' and cannot claim again",
                program.name
            );
            let message = match existing.status {
                ReferralLinkUsageStatus::Pending => {
                    let expiry = match program.completion_window_in_days {
                        Some(days) => Some(existing.date_claimed + Duration::days(days as i64)),
                        None => program.date_end,
                    };
                    match expiry {
                        Some(expiry) if expiry <= now => format!(
                            "{prefix}. Your previous claim for link '{}' on '{}' has expired \
                             on '{}'",
                            link.name,
                            day(existing.date_claimed),
                            day(expiry)
                        ),
                        _ => format!(
                            "{prefix}. You already claimed link '{}' on '{}' and it is still \
                             pending",
                            link.name,
                            day(existing.date_claimed)
                        ),
                    }
                }
                ReferralLinkUsageStatus::Completed => format!(
                    "{prefix}. You already completed program '{}' using link '{}' on '{}'",
                    program.name,
                    link.name,
                    optional_day(existing.date_completed)
                ),
                ReferralLinkUsageStatus::Expired => format!(
                    "{prefix}. Your claim for link '{}' on '{}' expired on '{}'",
                    link.name,
                    day(existing.date_claimed),
                    optional_day(existing.date_expired)
                ),
            };
            return Err(claim_rejected(message));
        }

        if program.status != ProgramStatus::Active {
            return Err(claim_rejected(format!(
                "Program '{}' status is '{}'",
                program.name, program.status
            )));
        }
        if program.date_start > now {
            return Err(claim_rejected(format!(
                "Program '{}' only starts on '{}'",
                program.name,
                day(program.date_start)
            )));
        }
        if let Some(date_end) = program.date_end
            && date_end <= now
        {
            return Err(claim_rejected(format!(
                "Program '{}' expired on '{}'",
                program.name,
                day(date_end)
            )));
        }
        if reward::cap_reached(&program, &link) {
            return Err(claim_rejected(format!(
                "Program '{}' has reached its completion limit",
                program.name
            )));
        }
        if link.status != ReferralLinkStatus::Active {
            return Err(claim_rejected(format!(
                "Referral link '{}' status is '{}'",
                link.name, link.status
            )));
        }

        let usage =
            ReferralLinkUsage::create(&self.db.pool, Uuid::new_v4(), program.id, link.id, user.id)
                .await?;
        info!(
            usage_id = %usage.id,
            link_id = %link.id,
            program_id = %program.id,
            user_id = %user.id,
            "Referral link claimed"
        );
        Ok(usage)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<ReferralLinkUsageInfo, ReferralError> {
        let usage = ReferralLinkUsage::find_by_id(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Referral link usage", id))?;
        self.get_progress(usage).await
    }

    /// Usage visible to its referee and to the referrer who owns the link
    pub async fn get_by_id_as_participant(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<ReferralLinkUsageInfo, ReferralError> {
        let usage = ReferralLinkUsage::find_by_id(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Referral link usage", id))?;
        if usage.user_id != user_id && usage.user_id_referrer != user_id {
            return Err(ReferralError::Unauthorized);
        }
        self.get_progress(usage).await
    }

    pub async fn get_by_program_as_referee(
        &self,
        program_id: Uuid,
        user_id: Uuid,
    ) -> Result<ReferralLinkUsageInfo, ReferralError> {
        let usage = ReferralLinkUsage::find_by_user_and_program(&self.db.pool, user_id, program_id)
            .await?
            .ok_or_else(|| {
                ReferralError::NotFound(format!(
                    "Referral link usage for program '{program_id}' and the current user \
                     does not exist"
                ))
            })?;
        self.get_progress(usage).await
    }

    pub async fn search(
        &self,
        filter: &ReferralLinkUsageSearchFilter,
    ) -> Result<ReferralLinkUsageSearchResults, ReferralError> {
        let mut errors = ValidationErrors::new();
        errors.check(
            filter.page_number.is_some_and(|n| n < 1),
            "page_number",
            "Page number must be greater than 0.",
        );
        errors.check(
            filter.page_size.is_some_and(|n| n < 1),
            "page_size",
            "Page size must be greater than 0.",
        );
        errors.check(
            matches!((filter.date_start, filter.date_end), (Some(s), Some(e)) if e < s),
            "date_end",
            "End Date cannot be earlier than the Start Date.",
        );
        errors.into_result()?;

        Ok(ReferralLinkUsage::search(&self.db.pool, filter).await?)
    }

    /// Search the caller's own claims
    pub async fn search_as_referee(
        &self,
        user_id: Uuid,
        mut filter: ReferralLinkUsageSearchFilter,
    ) -> Result<ReferralLinkUsageSearchResults, ReferralError> {
        filter.user_id_referee = Some(user_id);
        self.search(&filter).await
    }

    /// Search claims made through the caller's links
    pub async fn search_as_referrer(
        &self,
        user_id: Uuid,
        mut filter: ReferralLinkUsageSearchFilter,
    ) -> Result<ReferralLinkUsageSearchResults, ReferralError> {
        filter.user_id_referrer = Some(user_id);
        self.search(&filter).await
    }

    /// Progress of one usage against its program's gates
    pub async fn get_progress(
        &self,
        usage: ReferralLinkUsage,
    ) -> Result<ReferralLinkUsageInfo, ReferralError> {
        let program = Program::find_with_pathway(&self.db.pool, usage.program_id)
            .await?
            .ok_or_else(|| {
                ReferralError::DataInconsistency(format!(
                    "usage '{}' references missing program '{}'",
                    usage.id, usage.program_id
                ))
            })?;
        let eligibility = eligibility::evaluate_program(self.directory.as_ref(), &program).await?;
        self.build_info(usage, &program, eligibility.as_ref(), Utc::now())
            .await
    }

    async fn build_info(
        &self,
        usage: ReferralLinkUsage,
        program: &ProgramWithPathway,
        eligibility: Option<&PathwayEligibility>,
        now: DateTime<Utc>,
    ) -> Result<ReferralLinkUsageInfo, ReferralError> {
        let user = self
            .directory
            .user(usage.user_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("User", usage.user_id))?;

        let mut methods = Vec::new();
        if user.phone_number_confirmed {
            methods.push(ProofOfPersonhoodMethod::Otp);
        }
        if user.has_social_login {
            methods.push(ProofOfPersonhoodMethod::SocialLogin);
        }
        let pop_completed = !methods.is_empty();

        let pathway = match (&program.pathway, eligibility) {
            (Some(pathway), Some(eligibility)) => {
                let mut completions = HashMap::new();
                for opportunity_id in pathway.opportunity_ids() {
                    if let Some(date) = self
                        .directory
                        .opportunity_completion(usage.user_id, opportunity_id)
                        .await?
                    {
                        completions.insert(opportunity_id, date);
                    }
                }
                Some(pathway_progress::compute(pathway, |task| {
                    let date_completed = task
                        .opportunity_id
                        .and_then(|id| completions.get(&id).copied());
                    TaskFacts {
                        completed: date_completed.is_some(),
                        date_completed,
                        eligibility: eligibility.task(task.id),
                    }
                }))
            }
            _ => None,
        };

        let pop_required = program.proof_of_personhood_required;
        let pathway_required = program.pathway_required;
        let pathway_completed = pathway.as_ref().map(|p| p.completed);

        // Proof of personhood carries the whole score without a pathway, half of it with one
        let pop_percent = if pop_completed { HUNDRED } else { Decimal::ZERO };
        let percent_complete = match pathway.as_ref() {
            None => pop_percent,
            Some(p) => ((pop_percent + p.percent_complete) / Decimal::TWO).round_dp(2),
        };

        Ok(ReferralLinkUsageInfo {
            time_remaining_in_days: usage.time_remaining_in_days(now),
            date_complete_by: usage.date_complete_by(now),
            usage,
            proof_of_personhood_required: pop_required,
            proof_of_personhood_methods: methods,
            proof_of_personhood_completed: pop_completed,
            pathway_required,
            pathway_completed,
            proof_of_personhood_effective_completed: !pop_required || pop_completed,
            pathway_effective_completed: !pathway_required || pathway_completed == Some(true),
            percent_complete,
            pathway,
        })
    }

    async fn expire(
        &self,
        usage: &ReferralLinkUsage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ReferralError> {
        let moved = ReferralLinkUsage::mark_expired(&self.db.pool, usage.id, now).await?;
        if moved > 0 {
            info!(
                usage_id = %usage.id,
                program_id = %usage.program_id,
                reason,
                "Referral link usage expired"
            );
        }
        Ok(moved > 0)
    }

    /// Completion trigger for one referee: re-evaluates every pending usage and completes,
    /// expires or leaves each one as it stands
    pub async fn process_progress(&self, user_id: Uuid) -> Result<ProgressSummary, ReferralError> {
        let _guard = self.locks.lock(&user_progress_key(user_id)).await;
        let mut summary = ProgressSummary::default();
        let mut notifications = Vec::new();
        let mut credits = Vec::new();

        let pending = ReferralLinkUsage::find_pending_by_user(&self.db.pool, user_id).await?;
        for usage in pending {
            let now = Utc::now();
            let program = Program::find_with_pathway(&self.db.pool, usage.program_id)
                .await?
                .ok_or_else(|| {
                    ReferralError::DataInconsistency(format!(
                        "usage '{}' references missing program '{}'",
                        usage.id, usage.program_id
                    ))
                })?;
            let link = ReferralLink::find_by_id(&self.db.pool, usage.link_id)
                .await?
                .ok_or_else(|| {
                    ReferralError::DataInconsistency(format!(
                        "usage '{}' references missing link '{}'",
                        usage.id, usage.link_id
                    ))
                })?;

            let expire_reason = if !program.status.allows_completion() {
                Some("program no longer allows completion")
            } else if !matches!(
                link.status,
                ReferralLinkStatus::Active | ReferralLinkStatus::LimitReached
            ) {
                Some("link no longer allows completion")
            } else if window_elapsed(&usage, program.completion_window_in_days, now) {
                Some("completion window elapsed")
            } else {
                None
            };
            if let Some(reason) = expire_reason {
                if self.expire(&usage, reason, now).await? {
                    summary.expired += 1;
                }
                continue;
            }

            let eligibility =
                eligibility::evaluate_program(self.directory.as_ref(), &program).await?;
            if !eligibility::program_completability(eligibility.as_ref()).is_completable {
                debug!(usage_id = %usage.id, "Pathway not completable; usage left pending");
                summary.pending += 1;
                continue;
            }

            let info = self
                .build_info(usage, &program, eligibility.as_ref(), now)
                .await?;
            if !info.gates_completed() {
                summary.pending += 1;
                continue;
            }

            match self.complete(&info.usage, now).await? {
                Some(completion) => {
                    summary.completed += 1;
                    notifications.extend(completion_notifications(&completion));
                    credits.extend(completion_credits(&completion));
                }
                None => summary.pending += 1,
            }
        }

        self.rewards.credit_all(credits).await;
        self.notifications.notify_all(notifications).await;
        Ok(summary)
    }

    /// Pay out and record one completion. Serialized per program so the pool balance and
    /// caps are read and written by one completion at a time.
    async fn complete(
        &self,
        usage: &ReferralLinkUsage,
        now: DateTime<Utc>,
    ) -> Result<Option<Completion>, ReferralError> {
        let _guard = self
            .locks
            .lock(&program_completion_key(usage.program_id))
            .await;
        let mut tx = self.db.pool.begin().await?;

        let program = Program::find_by_id(&mut *tx, usage.program_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", usage.program_id))?;
        let link = ReferralLink::find_by_id(&mut *tx, usage.link_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Referral link", usage.link_id))?;

        let cap_reached = reward::cap_reached(&program, &link);
        let allocation = reward::allocate(&program, cap_reached);

        let moved = ReferralLinkUsage::mark_completed(
            &mut *tx,
            usage.id,
            reward::paid(allocation.referee),
            reward::paid(allocation.referrer),
            now,
        )
        .await?;
        if moved == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let program_capped = program
            .completion_limit
            .is_some_and(|limit| program.completion_total + 1 >= limit);
        let program_status = if program_capped && program.status == ProgramStatus::Active {
            ProgramStatus::LimitReached
        } else {
            program.status
        };
        Program::record_completion(
            &mut *tx,
            program.id,
            reward::accumulate(program.zlto_reward_cumulative, allocation.total()),
            program_status,
        )
        .await?;

        let referrer_capped = program
            .completion_limit_referee
            .is_some_and(|limit| link.completion_total + 1 >= limit);
        let link_status = if link.status == ReferralLinkStatus::Active
            && (referrer_capped || program_status == ProgramStatus::LimitReached)
        {
            ReferralLinkStatus::LimitReached
        } else {
            link.status
        };
        ReferralLink::record_completion(
            &mut *tx,
            link.id,
            reward::accumulate(link.zlto_reward_cumulative, allocation.referrer),
            link_status,
        )
        .await?;

        if program_status != program.status {
            let links = ReferralLink::update_active_by_program_id(
                &mut *tx,
                program.id,
                ReferralLinkStatus::LimitReached,
            )
            .await?;
            info!(
                program_id = %program.id,
                links_limited = links,
                "Program completion limit reached"
            );
        }

        tx.commit().await?;

        info!(
            usage_id = %usage.id,
            program_id = %program.id,
            link_id = %link.id,
            reward_referee = %allocation.referee,
            reward_referrer = %allocation.referrer,
            cap_reached,
            "Referral link usage completed"
        );

        Ok(Some(Completion {
            usage_id: usage.id,
            program_id: program.id,
            program_name: program.name,
            referee_id: usage.user_id,
            referrer_id: link.user_id,
            allocation,
        }))
    }
}

fn completion_credits(completion: &Completion) -> [RewardCredit; 2] {
    let credit = |user_id, role, amount| RewardCredit {
        usage_id: completion.usage_id,
        program_id: completion.program_id,
        user_id,
        role,
        amount,
    };
    [
        credit(
            completion.referee_id,
            RewardRole::Referee,
            completion.allocation.referee,
        ),
        credit(
            completion.referrer_id,
            RewardRole::Referrer,
            completion.allocation.referrer,
        ),
    ]
}

fn completion_notifications(completion: &Completion) -> Vec<Notification> {
    let reward_text = |amount: Decimal| {
        if amount > Decimal::ZERO {
            format!(" and earned {amount} ZLTO")
        } else {
            String::new()
        }
    };
    vec![
        Notification {
            kind: NotificationType::ReferralUsageCompletedReferee,
            recipient: Recipient::User(completion.referee_id),
            subject: "Referral completed".to_string(),
            message: format!(
                "You completed the '{}' referral program{}",
                completion.program_name,
                reward_text(completion.allocation.referee)
            ),
        },
        Notification {
            kind: NotificationType::ReferralUsageCompletedReferrer,
            recipient: Recipient::User(completion.referrer_id),
            subject: "Your referral completed".to_string(),
            message: format!(
                "Someone you referred completed the '{}' referral program{}",
                completion.program_name,
                reward_text(completion.allocation.referrer)
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use db::models::{
        program::ProgramData,
        referral_link::CreateReferralLink,
        user::{CreateUser, User},
    };

    use super::*;
    use crate::services::{
        directory::SqliteDirectory,
        ledger::{LedgerError, RewardLedger},
        notification::{NotificationDelivery, NotificationError},
    };

    #[derive(Default)]
    struct RecordingLedger {
        credits: Mutex<Vec<RewardCredit>>,
    }

    #[async_trait]
    impl RewardLedger for RecordingLedger {
        async fn credit(&self, credit: &RewardCredit) -> Result<(), LedgerError> {
            self.credits.lock().unwrap().push(credit.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDelivery {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationDelivery for RecordingDelivery {
        async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        db: DBService,
        service: LinkUsageService,
        delivery: Arc<RecordingDelivery>,
        ledger: Arc<RecordingLedger>,
    }

    async fn fixture() -> Fixture {
        let db = DBService::new_in_memory().await.unwrap();
        let directory = Arc::new(SqliteDirectory::new(db.pool.clone()));
        let delivery = Arc::new(RecordingDelivery::default());
        let ledger = Arc::new(RecordingLedger::default());
        let service = LinkUsageService::new(
            db.clone(),
            directory,
            NotificationService::new(delivery.clone()),
            RewardService::new(ledger.clone()),
            KeyedLocks::new(),
            ClaimOptions::default(),
        );
        Fixture {
            db,
            service,
            delivery,
            ledger,
        }
    }

    async fn user(db: &DBService, onboarded_minutes_ago: Option<i64>, pop: bool) -> Uuid {
        let id = Uuid::new_v4();
        User::create(
            &db.pool,
            &CreateUser {
                id,
                username: format!("user-{id}"),
                display_name: None,
                email: None,
                phone_number: pop.then(|| "+27820000000".to_string()),
                phone_number_confirmed: pop,
                has_social_login: false,
                date_onboarded: onboarded_minutes_ago.map(|m| Utc::now() - Duration::minutes(m)),
            },
        )
        .await
        .unwrap();
        id
    }

    fn data(name: &str) -> ProgramData {
        ProgramData {
            name: name.to_string(),
            description: None,
            completion_window_in_days: Some(30),
            completion_limit_referee: Some(5),
            completion_limit: Some(2),
            zlto_reward_referrer: Some(Decimal::from(10)),
            zlto_reward_referee: Some(Decimal::from(10)),
            zlto_reward_pool: Some(Decimal::from(30)),
            proof_of_personhood_required: true,
            pathway_required: false,
            multiple_links_allowed: false,
            date_start: Utc::now() - Duration::days(1),
            date_end: None,
        }
    }

    async fn program_with_link(db: &DBService, data: &ProgramData) -> (Program, ReferralLink) {
        let program = Program::create(&db.pool, Uuid::new_v4(), data, Uuid::new_v4())
            .await
            .unwrap();
        let referrer = user(db, Some(60 * 24), true).await;
        let link = ReferralLink::create(
            &db.pool,
            Uuid::new_v4(),
            referrer,
            &CreateReferralLink {
                name: "Share".to_string(),
                description: None,
                program_id: program.id,
            },
        )
        .await
        .unwrap();
        (program, link)
    }

    fn rejection(err: ReferralError) -> String {
        match err {
            ReferralError::Validation(errors) => errors.errors[0].message.clone(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_claim_guards() {
        let f = fixture().await;
        let (_, link) = program_with_link(&f.db, &data("Guards")).await;

        let err = f.service.claim_as_referee(link.id, link.user_id).await.unwrap_err();
        assert_eq!(rejection(err), "You cannot claim your own referral link");

        let not_onboarded = user(&f.db, None, false).await;
        let err = f.service.claim_as_referee(link.id, not_onboarded).await.unwrap_err();
        assert!(rejection(err).starts_with("You must complete your profile"));

        let veteran = user(&f.db, Some(60), false).await;
        let err = f.service.claim_as_referee(link.id, veteran).await.unwrap_err();
        assert!(rejection(err).starts_with("You are already registered"));

        let referee = user(&f.db, Some(1), false).await;
        let usage = f.service.claim_as_referee(link.id, referee).await.unwrap();
        assert_eq!(usage.status, ReferralLinkUsageStatus::Pending);

        let err = f.service.claim_as_referee(link.id, referee).await.unwrap_err();
        assert!(rejection(err).ends_with("and it is still pending"));
    }

    #[tokio::test]
    async fn test_claim_blocked_after_other_program() {
        let f = fixture().await;
        let (_, first) = program_with_link(&f.db, &data("First")).await;
        let (_, second) = program_with_link(&f.db, &data("Second")).await;
        let referee = user(&f.db, Some(1), false).await;

        f.service.claim_as_referee(first.id, referee).await.unwrap();
        let err = f.service.claim_as_referee(second.id, referee).await.unwrap_err();
        assert_eq!(
            rejection(err),
            "You have already participated in program(s) 'First' and cannot claim again."
        );
    }

    #[tokio::test]
    async fn test_progress_percent_without_pathway_follows_personhood() {
        let f = fixture().await;
        let (_, link) = program_with_link(&f.db, &data("Percent")).await;
        let referee = user(&f.db, Some(1), false).await;
        let usage = f.service.claim_as_referee(link.id, referee).await.unwrap();

        let info = f.service.get_progress(usage).await.unwrap();
        assert!(info.proof_of_personhood_required);
        assert!(!info.proof_of_personhood_completed);
        assert!(info.pathway_effective_completed);
        assert_eq!(info.percent_complete, Decimal::ZERO);
        assert_eq!(info.time_remaining_in_days, Some(30));

        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("pathway_effective_completed").is_none());
        assert_eq!(json["link_name"], "Share");
    }

    #[tokio::test]
    async fn test_completion_pays_referee_first_and_flips_caps() {
        let f = fixture().await;
        let (program, link) = program_with_link(&f.db, &data("Pool")).await;

        let first = user(&f.db, Some(1), false).await;
        let second = user(&f.db, Some(1), false).await;
        f.service.claim_as_referee(link.id, first).await.unwrap();
        f.service.claim_as_referee(link.id, second).await.unwrap();

        // No proof of personhood yet
        let summary = f.service.process_progress(first).await.unwrap();
        assert_eq!(summary, ProgressSummary { completed: 0, expired: 0, pending: 1 });

        for id in [first, second] {
            User::create(
                &f.db.pool,
                &CreateUser {
                    id,
                    username: format!("user-{id}"),
                    display_name: None,
                    email: None,
                    phone_number: None,
                    phone_number_confirmed: false,
                    has_social_login: true,
                    date_onboarded: Some(Utc::now()),
                },
            )
            .await
            .unwrap();
        }

        let summary = f.service.process_progress(first).await.unwrap();
        assert_eq!(summary.completed, 1);
        let summary = f.service.process_progress(second).await.unwrap();
        assert_eq!(summary.completed, 1);

        let usage = ReferralLinkUsage::find_by_user_and_program(&f.db.pool, second, program.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.status, ReferralLinkUsageStatus::Completed);
        // Pool of 30: first completion takes 20, the second gets the remaining 10 as referee
        assert_eq!(usage.zlto_reward_referee, Some(Decimal::from(10)));
        assert_eq!(usage.zlto_reward_referrer, None);

        let program = Program::find_by_id(&f.db.pool, program.id).await.unwrap().unwrap();
        assert_eq!(program.completion_total, 2);
        assert_eq!(program.status, ProgramStatus::LimitReached);
        assert_eq!(program.zlto_reward_cumulative, Some(Decimal::from(30)));

        let link = ReferralLink::find_by_id(&f.db.pool, link.id).await.unwrap().unwrap();
        assert_eq!(link.status, ReferralLinkStatus::LimitReached);
        assert_eq!(link.completion_total, 2);
        assert_eq!(link.zlto_reward_cumulative, Some(Decimal::from(10)));

        let sent = f.delivery.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].recipient, Recipient::User(first));

        // The referrer's share of the second completion was zero and is not credited
        let credits = f.ledger.credits.lock().unwrap();
        let credited: Vec<(Uuid, RewardRole, Decimal)> =
            credits.iter().map(|c| (c.user_id, c.role, c.amount)).collect();
        assert_eq!(
            credited,
            vec![
                (first, RewardRole::Referee, Decimal::from(10)),
                (link.user_id, RewardRole::Referrer, Decimal::from(10)),
                (second, RewardRole::Referee, Decimal::from(10)),
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_claim_completes_unpaid_after_program_cap() {
        let f = fixture().await;
        let mut capped = data("Late");
        capped.completion_limit = Some(1);
        capped.zlto_reward_pool = Some(Decimal::from(100));
        let (program, link) = program_with_link(&f.db, &capped).await;

        let early = user(&f.db, Some(1), true).await;
        let late = user(&f.db, Some(1), true).await;
        f.service.claim_as_referee(link.id, early).await.unwrap();
        let late_usage = f.service.claim_as_referee(link.id, late).await.unwrap();

        assert_eq!(f.service.process_progress(early).await.unwrap().completed, 1);
        let current = Program::find_by_id(&f.db.pool, program.id).await.unwrap().unwrap();
        assert_eq!(current.status, ProgramStatus::LimitReached);

        let newcomer = user(&f.db, Some(1), true).await;
        let err = f.service.claim_as_referee(link.id, newcomer).await.unwrap_err();
        assert_eq!(rejection(err), "Program 'Late' status is 'limitreached'");

        assert_eq!(f.service.process_progress(late).await.unwrap().completed, 1);
        let usage = ReferralLinkUsage::find_by_id(&f.db.pool, late_usage.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.status, ReferralLinkUsageStatus::Completed);
        assert_eq!(usage.zlto_reward_referee, None);
        assert_eq!(usage.zlto_reward_referrer, None);

        let current = Program::find_by_id(&f.db.pool, program.id).await.unwrap().unwrap();
        assert_eq!(current.completion_total, 2);
        assert_eq!(current.zlto_reward_cumulative, Some(Decimal::from(20)));
        assert_eq!(current.status, ProgramStatus::LimitReached);
        let link = ReferralLink::find_by_id(&f.db.pool, link.id).await.unwrap().unwrap();
        assert_eq!(link.completion_total, 2);
        assert_eq!(link.status, ReferralLinkStatus::LimitReached);

        assert_eq!(f.ledger.credits.lock().unwrap().len(), 2);
        assert_eq!(f.delivery.sent.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_link_expires_pending_usage() {
        let f = fixture().await;
        let (_, link) = program_with_link(&f.db, &data("Cancelled")).await;
        let referee = user(&f.db, Some(1), true).await;
        let usage = f.service.claim_as_referee(link.id, referee).await.unwrap();

        ReferralLink::update_status(&f.db.pool, link.id, ReferralLinkStatus::Cancelled)
            .await
            .unwrap();
        let summary = f.service.process_progress(referee).await.unwrap();
        assert_eq!(summary.expired, 1);

        let usage = ReferralLinkUsage::find_by_id(&f.db.pool, usage.id).await.unwrap().unwrap();
        assert_eq!(usage.status, ReferralLinkUsageStatus::Expired);
        assert!(usage.date_expired.is_some());
        assert!(f.delivery.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_program_expires_pending_usage() {
        let f = fixture().await;
        let (program, link) = program_with_link(&f.db, &data("Paused")).await;
        let referee = user(&f.db, Some(1), true).await;
        let usage = f.service.claim_as_referee(link.id, referee).await.unwrap();

        Program::update_status(&f.db.pool, program.id, ProgramStatus::Inactive, Uuid::new_v4())
            .await
            .unwrap();
        let summary = f.service.process_progress(referee).await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.completed, 0);

        let usage = ReferralLinkUsage::find_by_id(&f.db.pool, usage.id).await.unwrap().unwrap();
        assert_eq!(usage.status, ReferralLinkUsageStatus::Expired);
        assert!(f.ledger.credits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usage_visible_to_participants_only() {
        let f = fixture().await;
        let (_, link) = program_with_link(&f.db, &data("Scoped")).await;
        let referee = user(&f.db, Some(1), false).await;
        let usage = f.service.claim_as_referee(link.id, referee).await.unwrap();

        let as_referee = f.service.get_by_id_as_participant(usage.id, referee).await.unwrap();
        assert_eq!(as_referee.usage.id, usage.id);
        let as_referrer = f
            .service
            .get_by_id_as_participant(usage.id, link.user_id)
            .await
            .unwrap();
        assert_eq!(as_referrer.usage.user_id, referee);

        let stranger = user(&f.db, Some(1), false).await;
        let err = f
            .service
            .get_by_id_as_participant(usage.id, stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::Unauthorized));

        // A filter naming someone else is overridden with the caller
        let filter = ReferralLinkUsageSearchFilter {
            user_id_referee: Some(referee),
            ..Default::default()
        };
        let results = f.service.search_as_referee(stranger, filter.clone()).await.unwrap();
        assert_eq!(results.total_count, 0);
        let results = f.service.search_as_referee(referee, filter).await.unwrap();
        assert_eq!(results.total_count, 1);

        let results = f
            .service
            .search_as_referrer(link.user_id, ReferralLinkUsageSearchFilter::default())
            .await
            .unwrap();
        assert_eq!(results.total_count, 1);
        let results = f
            .service
            .search_as_referrer(referee, ReferralLinkUsageSearchFilter::default())
            .await
            .unwrap();
        assert_eq!(results.total_count, 0);
    }
}
