//! Program administration: create, update, default selection and status changes.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveTime, Utc};
use db::{
    DBService,
    models::{
        program::{Program, ProgramData, ProgramStatus, ProgramWithPathway},
        program_pathway::{
            CreateProgramPathway, PathwayCompletionRule, PathwayOrderMode, PathwayTaskEntityType,
            ProgramPathway,
        },
        referral_link::{ReferralLink, ReferralLinkStatus},
    },
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    directory::ReferralDirectory,
    eligibility::{self, Completability, OpportunityItem, PathwayEligibility},
    error::{ReferralError, ValidationErrors},
    validation::{ProgramRequest, ValidationMode, validate_program},
};

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProgramInfo {
    #[serde(flatten)]
    pub program: Program,
    pub completion_balance: Option<i32>,
    #[ts(type = "number | null")]
    pub zlto_reward_balance: Option<Decimal>,
    pub countries: Vec<String>,
    pub pathway: Option<ProgramPathwayInfo>,
    #[serde(flatten)]
    pub completability: Completability,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProgramPathwayInfo {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    #[serde(flatten)]
    pub completability: Completability,
    pub steps: Vec<ProgramPathwayStepInfo>,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProgramPathwayStepInfo {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    pub order: Option<i32>,
    pub order_display: i32,
    #[serde(flatten)]
    pub completability: Completability,
    pub tasks: Vec<ProgramPathwayTaskInfo>,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProgramPathwayTaskInfo {
    pub id: Uuid,
    pub entity_type: PathwayTaskEntityType,
    pub opportunity: Option<OpportunityItem>,
    pub order: Option<i32>,
    pub order_display: i32,
    #[serde(flatten)]
    pub completability: Completability,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateProgramStatus {
    pub status: ProgramStatus,
}

fn pathway_info(pathway: &ProgramPathway, eligibility: &PathwayEligibility) -> ProgramPathwayInfo {
    ProgramPathwayInfo {
        id: pathway.id,
        name: pathway.name.clone(),
        description: pathway.description.clone(),
        rule: pathway.rule,
        order_mode: pathway.order_mode,
        completability: eligibility.pathway.clone(),
        steps: pathway
            .steps
            .iter()
            .map(|step| ProgramPathwayStepInfo {
                id: step.id,
                name: step.name.clone(),
                description: step.description.clone(),
                rule: step.rule,
                order_mode: step.order_mode,
                order: step.order,
                order_display: step.order_display(),
                completability: eligibility
                    .steps
                    .get(&step.id)
                    .cloned()
                    .unwrap_or_else(Completability::completable),
                tasks: step
                    .tasks
                    .iter()
                    .map(|task| {
                        let task_eligibility = eligibility.task(task.id);
                        ProgramPathwayTaskInfo {
                            id: task.id,
                            entity_type: task.entity_type,
                            opportunity: task_eligibility.opportunity,
                            order: task.order,
                            order_display: task.order_display(),
                            completability: task_eligibility.completability,
                        }
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Start dates snap to the start of the day, end dates to its last millisecond
fn start_of_day(date: DateTime<Utc>) -> DateTime<Utc> {
    date.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: DateTime<Utc>) -> DateTime<Utc> {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .map(|t| date.date_naive().and_time(t).and_utc())
        .unwrap_or(date)
}

fn program_data(request: &ProgramRequest) -> ProgramData {
    ProgramData {
        name: request.name.trim().to_string(),
        description: request.description.clone(),
        completion_window_in_days: request.completion_window_in_days,
        completion_limit_referee: request.completion_limit_referee,
        completion_limit: request.completion_limit,
        zlto_reward_referrer: request.zlto_reward_referrer,
        zlto_reward_referee: request.zlto_reward_referee,
        zlto_reward_pool: request.zlto_reward_pool,
        proof_of_personhood_required: request.proof_of_personhood_required,
        pathway_required: request.pathway_required,
        multiple_links_allowed: request.multiple_links_allowed,
        date_start: start_of_day(request.date_start),
        date_end: request.date_end.map(end_of_day),
    }
}

#[derive(Clone)]
pub struct ProgramService {
    db: DBService,
    directory: Arc<dyn ReferralDirectory>,
}

impl ProgramService {
    pub fn new(db: DBService, directory: Arc<dyn ReferralDirectory>) -> Self {
        Self { db, directory }
    }

    /// Program with countries, pathway and completability resolved
    pub async fn info(&self, program: ProgramWithPathway) -> Result<ProgramInfo, ReferralError> {
        let eligibility = eligibility::evaluate_program(self.directory.as_ref(), &program).await?;
        let completability = eligibility::program_completability(eligibility.as_ref());
        let pathway = match (&program.pathway, &eligibility) {
            (Some(pathway), Some(eligibility)) => Some(pathway_info(pathway, eligibility)),
            _ => None,
        };

        Ok(ProgramInfo {
            completion_balance: program.completion_balance(),
            zlto_reward_balance: program.zlto_reward_balance(),
            countries: program.countries,
            pathway,
            completability,
            program: program.program,
        })
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<ProgramInfo, ReferralError> {
        let program = Program::find_with_pathway(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", id))?;
        self.info(program).await
    }

    pub async fn get_default(&self) -> Result<Option<ProgramInfo>, ReferralError> {
        let Some(program) = Program::find_default(&self.db.pool).await? else {
            return Ok(None);
        };
        self.get_by_id(program.id).await.map(Some)
    }

    /// Every task must point at an opportunity the platform knows about
    async fn check_opportunities(
        &self,
        request: &ProgramRequest,
        errors: &mut ValidationErrors,
    ) -> Result<(), ReferralError> {
        let Some(pathway) = &request.pathway else {
            return Ok(());
        };
        for (i, step) in pathway.steps.iter().enumerate() {
            for (j, task) in step.tasks.iter().enumerate() {
                let Some(entity_id) = task.entity_id else { continue };
                if self.directory.opportunity(entity_id).await?.is_none() {
                    errors.add(
                        format!("pathway.steps[{i}].tasks[{j}].entity_id"),
                        format!("Opportunity with id '{entity_id}' does not exist"),
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        request: ProgramRequest,
    ) -> Result<ProgramInfo, ReferralError> {
        validate_program(&request, ValidationMode::Create).into_result()?;

        let mut errors = ValidationErrors::new();
        if Program::find_by_name(&self.db.pool, &request.name).await?.is_some() {
            errors.add(
                "name",
                format!("Program with the specified name '{}' already exists", request.name.trim()),
            );
        }
        self.check_opportunities(&request, &mut errors).await?;
        errors.into_result()?;

        let id = Uuid::new_v4();
        let data = program_data(&request);

        let mut tx = self.db.pool.begin().await?;
        Program::create(&mut *tx, id, &data, user_id).await?;
        Program::set_countries(&mut *tx, id, &request.countries).await?;
        if let Some(pathway) = &request.pathway {
            ProgramPathway::create_tree(&mut *tx, id, &CreateProgramPathway::from(pathway)).await?;
        }
        if request.is_default {
            Program::set_default(&mut *tx, id, user_id).await?;
        }
        tx.commit().await?;

        info!(
            program_id = %id,
            name = %data.name,
            is_default = request.is_default,
            "Program created"
        );
        self.get_by_id(id).await
    }

    /// Supplied pathway, step and task ids must belong to the program's current tree
    fn check_tree_ids(
        request: &ProgramRequest,
        existing: Option<&ProgramPathway>,
        errors: &mut ValidationErrors,
    ) {
        let Some(pathway) = &request.pathway else { return };

        if let Some(id) = pathway.id
            && existing.is_none_or(|e| e.id != id)
        {
            errors.add(
                "pathway.id",
                format!("Pathway with id '{id}' does not belong to the program"),
            );
        }

        let existing_steps: HashMap<Uuid, Vec<Uuid>> = existing
            .map(|p| {
                p.steps
                    .iter()
                    .map(|s| (s.id, s.tasks.iter().map(|t| t.id).collect()))
                    .collect()
            })
            .unwrap_or_default();

        for (i, step) in pathway.steps.iter().enumerate() {
            let Some(step_id) = step.id else { continue };
            let Some(task_ids) = existing_steps.get(&step_id) else {
                errors.add(
                    format!("pathway.steps[{i}].id"),
                    format!("Step with id '{step_id}' does not belong to the pathway"),
                );
                continue;
            };
            for (j, task) in step.tasks.iter().enumerate() {
                if let Some(task_id) = task.id
                    && !task_ids.contains(&task_id)
                {
                    errors.add(
                        format!("pathway.steps[{i}].tasks[{j}].id"),
                        format!("Task with id '{task_id}' does not belong to the step"),
                    );
                }
            }
        }
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        request: ProgramRequest,
    ) -> Result<ProgramInfo, ReferralError> {
        validate_program(&request, ValidationMode::Update).into_result()?;
        let id = request
            .id
            .ok_or_else(|| ReferralError::invalid("Program id is required"))?;

        let existing = Program::find_with_pathway(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", id))?;

        if !existing.status.is_editable() {
            return Err(ReferralError::invalid(format!(
                "Program '{}' cannot be updated while its status is '{}'",
                existing.name, existing.status
            )));
        }

        let mut errors = ValidationErrors::new();
        if let Some(other) = Program::find_by_name(&self.db.pool, &request.name).await?
            && other.id != id
        {
            errors.add(
                "name",
                format!("Program with the specified name '{}' already exists", request.name.trim()),
            );
        }
        Self::check_tree_ids(&request, existing.pathway.as_ref(), &mut errors);
        self.check_opportunities(&request, &mut errors).await?;
        errors.into_result()?;

        let data = program_data(&request);

        let mut tx = self.db.pool.begin().await?;
        Program::update(&mut *tx, id, &data, user_id).await?;
        Program::set_countries(&mut *tx, id, &request.countries).await?;
        ProgramPathway::delete_by_program_id(&mut *tx, id).await?;
        if let Some(pathway) = &request.pathway {
            ProgramPathway::create_tree(&mut *tx, id, &CreateProgramPathway::from(pathway)).await?;
        }
        match (request.is_default, existing.is_default) {
            (true, false) => {
                Program::set_default(&mut *tx, id, user_id).await?;
            }
            (false, true) => {
                Program::clear_default(&mut *tx, id, user_id).await?;
            }
            _ => {}
        }
        tx.commit().await?;

        info!(program_id = %id, "Program updated");
        self.get_by_id(id).await
    }

    pub async fn set_as_default(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<ProgramInfo, ReferralError> {
        let program = Program::find_by_id(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", id))?;

        if program.status == ProgramStatus::Deleted {
            return Err(ReferralError::invalid(format!(
                "Program '{}' has been deleted and cannot be the default",
                program.name
            )));
        }
        if !program.proof_of_personhood_required && !program.pathway_required {
            return Err(ReferralError::invalid(
                "Default programs must enable Proof of Personhood or require a Pathway.",
            ));
        }

        if !program.is_default {
            let mut tx = self.db.pool.begin().await?;
            Program::set_default(&mut *tx, id, user_id).await?;
            tx.commit().await?;
            info!(program_id = %id, "Program set as default");
        }

        self.get_by_id(id).await
    }

    /// Admin status changes: `Active`/`Inactive` toggle and `Deleted` from any live status
    pub async fn update_status(
        &self,
        id: Uuid,
        status: ProgramStatus,
        user_id: Uuid,
    ) -> Result<ProgramInfo, ReferralError> {
        let program = Program::find_with_pathway(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", id))?;

        if program.status == status {
            return self.info(program).await;
        }

        let allowed_from: &[ProgramStatus] = match status {
            ProgramStatus::Active => &[ProgramStatus::Inactive],
            ProgramStatus::Inactive => &[ProgramStatus::Active],
            ProgramStatus::Deleted => &[
                ProgramStatus::Active,
                ProgramStatus::Inactive,
                ProgramStatus::Expired,
                ProgramStatus::LimitReached,
                ProgramStatus::UnCompletable,
            ],
            _ => &[],
        };
        if !allowed_from.contains(&program.status) {
            return Err(ReferralError::invalid(format!(
                "Program '{}' cannot be changed from '{}' to '{}'",
                program.name, program.status, status
            )));
        }

        if status == ProgramStatus::Active {
            let eligibility =
                eligibility::evaluate_program(self.directory.as_ref(), &program).await?;
            let completability = eligibility::program_completability(eligibility.as_ref());
            if !completability.is_completable {
                return Err(ReferralError::invalid(format!(
                    "Program '{}' cannot be activated: {}",
                    program.name,
                    completability
                        .non_completable_reason
                        .unwrap_or_else(|| "pathway is not completable".to_string())
                )));
            }
        }

        let mut tx = self.db.pool.begin().await?;
        Program::update_status(&mut *tx, id, status, user_id).await?;
        if status == ProgramStatus::Deleted {
            let cancelled =
                ReferralLink::close_by_program_id(&mut *tx, id, ReferralLinkStatus::Cancelled)
                    .await?;
            if program.is_default {
                Program::clear_default(&mut *tx, id, user_id).await?;
            }
            info!(program_id = %id, links_cancelled = cancelled, "Program deleted");
        }
        tx.commit().await?;

        info!(program_id = %id, from = %program.status, to = %status, "Program status updated");
        self.get_by_id(id).await
    }
}
