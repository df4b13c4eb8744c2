//! Whether pathway tasks can currently be satisfied, independent of whether they have been.

use std::collections::{BTreeSet, HashMap};

use db::models::{
    opportunity::Opportunity,
    program::ProgramWithPathway,
    program_pathway::{
        PathwayCompletionRule, PathwayTaskEntityType, ProgramPathway, ProgramPathwayTask,
    },
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::{directory::ReferralDirectory, error::ReferralError};

/// Country code standing in for an empty country set
pub const WORLDWIDE: &str = "WW";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Completability {
    pub is_completable: bool,
    pub non_completable_reason: Option<String>,
}

impl Completability {
    pub fn completable() -> Self {
        Self {
            is_completable: true,
            non_completable_reason: None,
        }
    }

    pub fn not_completable(reason: impl Into<String>) -> Self {
        Self {
            is_completable: false,
            non_completable_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct OpportunityItem {
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEligibility {
    pub opportunity: Option<OpportunityItem>,
    pub completability: Completability,
}

/// Completability of every node in a pathway
#[derive(Debug, Clone)]
pub struct PathwayEligibility {
    pub pathway: Completability,
    pub steps: HashMap<Uuid, Completability>,
    pub tasks: HashMap<Uuid, TaskEligibility>,
}

impl PathwayEligibility {
    pub fn task(&self, task_id: Uuid) -> TaskEligibility {
        self.tasks.get(&task_id).cloned().unwrap_or(TaskEligibility {
            opportunity: None,
            completability: Completability::not_completable("Task could not be resolved"),
        })
    }
}

/// Normalised country set; an empty set becomes `{WORLDWIDE}`
pub fn effective_countries(codes: &[String]) -> BTreeSet<String> {
    let set: BTreeSet<String> = codes
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    if set.is_empty() {
        BTreeSet::from([WORLDWIDE.to_string()])
    } else {
        set
    }
}

/// Literal overlap: `WORLDWIDE` only matches `WORLDWIDE`
pub fn countries_overlap(program_countries: &[String], opportunity_countries: &[String]) -> bool {
    let program = effective_countries(program_countries);
    let opportunity = effective_countries(opportunity_countries);
    !program.is_disjoint(&opportunity)
}

/// Completability of one task given its resolved opportunity
pub fn task_completability(
    program_countries: &[String],
    task: &ProgramPathwayTask,
    opportunity: Option<&Opportunity>,
) -> Result<Completability, ReferralError> {
    match task.entity_type {
        PathwayTaskEntityType::Opportunity => {
            let Some(opportunity) = opportunity else {
                return Err(ReferralError::DataInconsistency(format!(
                    "Task '{}' references an opportunity that could not be resolved",
                    task.id
                )));
            };

            if !opportunity.is_completable {
                return Ok(Completability {
                    is_completable: false,
                    non_completable_reason: opportunity.non_completable_reason.clone(),
                });
            }

            if !countries_overlap(program_countries, &opportunity.countries) {
                return Ok(Completability::not_completable(format!(
                    "Opportunity '{}' is not available in any of the countries \
                     assigned to the program",
                    opportunity.title
                )));
            }

            Ok(Completability::completable())
        }
    }
}

/// Fold child completability under a rule. `All` needs every child, `Any` needs one;
/// no children is not completable. The first failing reason is carried.
pub fn combine(
    rule: PathwayCompletionRule,
    children: impl IntoIterator<Item = Completability>,
    empty_reason: &str,
) -> Completability {
    let children: Vec<Completability> = children.into_iter().collect();
    if children.is_empty() {
        return Completability::not_completable(empty_reason);
    }

    let first_reason = || {
        children
            .iter()
            .find(|c| !c.is_completable)
            .and_then(|c| c.non_completable_reason.clone())
    };

    let completable = match rule {
        PathwayCompletionRule::All => children.iter().all(|c| c.is_completable),
        PathwayCompletionRule::Any => children.iter().any(|c| c.is_completable),
    };

    if completable {
        Completability::completable()
    } else {
        Completability {
            is_completable: false,
            non_completable_reason: first_reason(),
        }
    }
}

/// Resolve every task's opportunity and fold completability up to the pathway
pub async fn evaluate_pathway(
    directory: &dyn ReferralDirectory,
    pathway: &ProgramPathway,
    program_countries: &[String],
) -> Result<PathwayEligibility, ReferralError> {
    let mut steps = HashMap::new();
    let mut tasks = HashMap::new();
    let mut step_results = Vec::with_capacity(pathway.steps.len());

    for step in &pathway.steps {
        let mut task_results = Vec::with_capacity(step.tasks.len());
        for task in &step.tasks {
            let opportunity = match task.opportunity_id {
                Some(id) => directory.opportunity(id).await?,
                None => None,
            };
            let completability =
                task_completability(program_countries, task, opportunity.as_ref())?;
            task_results.push(completability.clone());
            tasks.insert(
                task.id,
                TaskEligibility {
                    opportunity: opportunity.map(|o| OpportunityItem {
                        id: o.id,
                        title: o.title,
                    }),
                    completability,
                },
            );
        }

        let step_completability = combine(
            step.rule,
            task_results,
            &format!("Step '{}' has no tasks", step.name),
        );
        step_results.push(step_completability.clone());
        steps.insert(step.id, step_completability);
    }

    let pathway_completability = combine(
        pathway.rule,
        step_results,
        &format!("Pathway '{}' has no steps", pathway.name),
    );

    Ok(PathwayEligibility {
        pathway: pathway_completability,
        steps,
        tasks,
    })
}

/// Eligibility of a program's pathway; `None` when the program does not require one
pub async fn evaluate_program(
    directory: &dyn ReferralDirectory,
    program: &ProgramWithPathway,
) -> Result<Option<PathwayEligibility>, ReferralError> {
    if !program.pathway_required {
        return Ok(None);
    }
    let Some(pathway) = &program.pathway else {
        return Err(ReferralError::DataInconsistency(format!(
            "Program '{}' requires a pathway but none is configured",
            program.id
        )));
    };
    evaluate_pathway(directory, pathway, &program.countries)
        .await
        .map(Some)
}

/// Program-level completability: the pathway's, or completable when there is none
pub fn program_completability(eligibility: Option<&PathwayEligibility>) -> Completability {
    eligibility
        .map(|e| e.pathway.clone())
        .unwrap_or_else(Completability::completable)
}
