//! Completion arithmetic for a referee's walk through a pathway.
//!
//! Progress is rebuilt from scratch on every evaluation from the pathway definition and
//! the referee's task completion facts. Nothing here touches storage.

use chrono::{DateTime, Utc};
use db::models::program_pathway::{
    PathwayCompletionRule, PathwayOrderMode, PathwayTaskEntityType, ProgramPathway,
    ProgramPathwayTask,
};
use rust_decimal::Decimal;
use serde::Serialize;
use ts_rs::TS;
use uuid::Uuid;

use super::eligibility::{self, Completability, OpportunityItem, TaskEligibility};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// What is known about one task for one referee
#[derive(Debug, Clone)]
pub struct TaskFacts {
    pub completed: bool,
    pub date_completed: Option<DateTime<Utc>>,
    pub eligibility: TaskEligibility,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
pub struct ProgramPathwayProgress {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    pub completed: bool,
    pub date_completed: Option<DateTime<Utc>>,
    #[ts(type = "number")]
    pub percent_complete: Decimal,
    pub steps_total: usize,
    pub steps_completed: usize,
    #[serde(flatten)]
    pub completability: Completability,
    pub steps: Vec<ProgramPathwayStepProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
pub struct ProgramPathwayStepProgress {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    pub order: Option<i32>,
    pub order_display: i32,
    pub completed: bool,
    pub date_completed: Option<DateTime<Utc>>,
    #[ts(type = "number")]
    pub percent_complete: Decimal,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub is_attemptable: bool,
    #[serde(flatten)]
    pub completability: Completability,
    pub tasks: Vec<ProgramPathwayTaskProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
pub struct ProgramPathwayTaskProgress {
    pub id: Uuid,
    pub entity_type: PathwayTaskEntityType,
    pub opportunity: Option<OpportunityItem>,
    pub order: Option<i32>,
    pub order_display: i32,
    pub completed: bool,
    pub date_completed: Option<DateTime<Utc>>,
    pub is_attemptable: bool,
    #[serde(flatten)]
    pub completability: Completability,
}

/// Earliest date under `Any`, latest under `All`
fn date_completed(
    rule: PathwayCompletionRule,
    dates: impl Iterator<Item = Option<DateTime<Utc>>>,
) -> Option<DateTime<Utc>> {
    let dates = dates.flatten();
    match rule {
        PathwayCompletionRule::Any => dates.min(),
        PathwayCompletionRule::All => dates.max(),
    }
}

/// `part / total` as a percentage rounded to two places (banker's rounding)
fn percent(part: usize, total: usize) -> Decimal {
    if total == 0 {
        return HUNDRED;
    }
    (Decimal::from(part as u64) * HUNDRED / Decimal::from(total as u64)).round_dp(2)
}

/// Sequential gating: an ordered item is attemptable once every item with a lower order
/// is completed. Unordered items and any-order parents never gate.
fn attemptable(order_mode: PathwayOrderMode, items: &[(Option<i32>, bool)]) -> Vec<bool> {
    items
        .iter()
        .map(|(order, _)| match (order_mode, order) {
            (PathwayOrderMode::Sequential, Some(order)) => items
                .iter()
                .filter(|(other, _)| other.is_some_and(|o| o < *order))
                .all(|(_, completed)| *completed),
            _ => true,
        })
        .collect()
}

fn task_progress(task: &ProgramPathwayTask, facts: TaskFacts) -> ProgramPathwayTaskProgress {
    ProgramPathwayTaskProgress {
        id: task.id,
        entity_type: task.entity_type,
        opportunity: facts.eligibility.opportunity,
        order: task.order,
        order_display: task.order_display(),
        completed: facts.completed,
        date_completed: if facts.completed {
            facts.date_completed
        } else {
            None
        },
        is_attemptable: true,
        completability: facts.eligibility.completability,
    }
}

/// Build the referee's progress through `pathway`. `facts` is asked once per task.
pub fn compute(
    pathway: &ProgramPathway,
    mut facts: impl FnMut(&ProgramPathwayTask) -> TaskFacts,
) -> ProgramPathwayProgress {
    let mut steps: Vec<ProgramPathwayStepProgress> = pathway
        .steps
        .iter()
        .map(|step| {
            let mut tasks: Vec<ProgramPathwayTaskProgress> = step
                .tasks
                .iter()
                .map(|task| task_progress(task, facts(task)))
                .collect();

            let gates: Vec<(Option<i32>, bool)> =
                tasks.iter().map(|t| (t.order, t.completed)).collect();
            let flags = attemptable(step.order_mode, &gates);
            for (task, is_attemptable) in tasks.iter_mut().zip(flags) {
                task.is_attemptable = is_attemptable;
            }

            let tasks_total = tasks.len();
            let tasks_completed = tasks.iter().filter(|t| t.completed).count();
            let completed = match step.rule {
                _ if tasks_total == 0 => true,
                PathwayCompletionRule::All => tasks_completed == tasks_total,
                PathwayCompletionRule::Any => tasks_completed > 0,
            };
            let percent_complete = match step.rule {
                _ if tasks_total == 0 => HUNDRED,
                PathwayCompletionRule::All => percent(tasks_completed, tasks_total),
                PathwayCompletionRule::Any if completed => HUNDRED,
                PathwayCompletionRule::Any => Decimal::ZERO,
            };
            let completed_at = completed
                .then(|| {
                    let dates = tasks.iter().filter(|t| t.completed).map(|t| t.date_completed);
                    date_completed(step.rule, dates)
                })
                .flatten();
            let completability = eligibility::combine(
                step.rule,
                tasks.iter().map(|t| t.completability.clone()),
                &format!("Step '{}' has no tasks", step.name),
            );

            ProgramPathwayStepProgress {
                id: step.id,
                name: step.name.clone(),
                description: step.description.clone(),
                rule: step.rule,
                order_mode: step.order_mode,
                order: step.order,
                order_display: step.order_display(),
                completed,
                date_completed: completed_at,
                percent_complete,
                tasks_total,
                tasks_completed,
                is_attemptable: true,
                completability,
                tasks,
            }
        })
        .collect();

    let gates: Vec<(Option<i32>, bool)> = steps.iter().map(|s| (s.order, s.completed)).collect();
    for (step, is_attemptable) in steps.iter_mut().zip(attemptable(pathway.order_mode, &gates)) {
        step.is_attemptable = is_attemptable;
    }

    let steps_total = steps.len();
    let steps_completed = steps.iter().filter(|s| s.completed).count();
    let percent_complete = if steps_total == 0 {
        HUNDRED
    } else {
        match pathway.rule {
            PathwayCompletionRule::Any => {
                if steps.iter().any(|s| s.percent_complete >= HUNDRED) {
                    HUNDRED
                } else {
                    Decimal::ZERO
                }
            }
            PathwayCompletionRule::All => {
                let sum: Decimal = steps.iter().map(|s| s.percent_complete).sum();
                (sum / Decimal::from(steps_total as u64))
                    .clamp(Decimal::ZERO, HUNDRED)
                    .round_dp(2)
            }
        }
    };
    // Completion follows from the percentage so the two can never disagree
    let completed = match pathway.rule {
        _ if steps_total == 0 => true,
        PathwayCompletionRule::All => steps_completed == steps_total,
        PathwayCompletionRule::Any => percent_complete >= HUNDRED,
    };
    let completability = eligibility::combine(
        pathway.rule,
        steps.iter().map(|s| s.completability.clone()),
        &format!("Pathway '{}' has no steps", pathway.name),
    );

    ProgramPathwayProgress {
        id: pathway.id,
        name: pathway.name.clone(),
        description: pathway.description.clone(),
        rule: pathway.rule,
        order_mode: pathway.order_mode,
        completed,
        date_completed: completed
            .then(|| {
                let dates = steps.iter().filter(|s| s.completed).map(|s| s.date_completed);
                date_completed(pathway.rule, dates)
            })
            .flatten(),
        percent_complete,
        steps_total,
        steps_completed,
        completability,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use db::models::program_pathway::ProgramPathwayStep;

    use super::*;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap() + Duration::days(n)
    }

    fn task(order: Option<i32>) -> ProgramPathwayTask {
        ProgramPathwayTask {
            id: Uuid::new_v4(),
            step_id: Uuid::nil(),
            entity_type: PathwayTaskEntityType::Opportunity,
            opportunity_id: Some(Uuid::new_v4()),
            order,
            position: 0,
            created_at: day(0),
            updated_at: day(0),
        }
    }

    fn step(
        rule: PathwayCompletionRule,
        order: Option<i32>,
        tasks: Vec<ProgramPathwayTask>,
    ) -> ProgramPathwayStep {
        ProgramPathwayStep {
            id: Uuid::new_v4(),
            pathway_id: Uuid::nil(),
            name: "Step".to_string(),
            description: None,
            rule,
            order_mode: PathwayOrderMode::AnyOrder,
            order,
            position: 0,
            created_at: day(0),
            updated_at: day(0),
            tasks,
        }
    }

    fn pathway(
        rule: PathwayCompletionRule,
        order_mode: PathwayOrderMode,
        steps: Vec<ProgramPathwayStep>,
    ) -> ProgramPathway {
        ProgramPathway {
            id: Uuid::new_v4(),
            program_id: Uuid::nil(),
            name: "Pathway".to_string(),
            description: None,
            rule,
            order_mode,
            created_at: day(0),
            updated_at: day(0),
            steps,
        }
    }

    /// Facts where the listed tasks are completed on the given days
    fn facts_for(done: Vec<(Uuid, i64)>) -> impl FnMut(&ProgramPathwayTask) -> TaskFacts {
        move |task| {
            let date = done.iter().find(|(id, _)| *id == task.id).map(|(_, d)| day(*d));
            TaskFacts {
                completed: date.is_some(),
                date_completed: date,
                eligibility: TaskEligibility {
                    opportunity: None,
                    completability: Completability::completable(),
                },
            }
        }
    }

    #[test]
    fn test_step_all_rule_is_proportional() {
        let tasks = vec![task(None), task(None), task(None)];
        let done = vec![(tasks[0].id, 1)];
        let p = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::All, None, tasks)],
        );

        let progress = compute(&p, facts_for(done));
        let step = &progress.steps[0];
        assert!(!step.completed);
        assert_eq!(step.tasks_completed, 1);
        assert_eq!(step.percent_complete, Decimal::new(3333, 2));
        assert!(step.date_completed.is_none());
    }

    #[test]
    fn test_step_any_rule_is_binary() {
        let tasks = vec![task(None), task(None), task(None)];
        let one = vec![(tasks[2].id, 4)];
        let p = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::Any, None, tasks)],
        );

        let progress = compute(&p, facts_for(one));
        assert!(progress.steps[0].completed);
        assert_eq!(progress.steps[0].percent_complete, HUNDRED);

        let none = compute(&p, facts_for(Vec::new()));
        assert!(!none.steps[0].completed);
        assert_eq!(none.steps[0].percent_complete, Decimal::ZERO);
    }

    #[test]
    fn test_pathway_all_averages_step_percentages() {
        let half = vec![task(None), task(None)];
        let full = vec![task(None)];
        let done = vec![(half[0].id, 1), (full[0].id, 2)];
        let p = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![
                step(PathwayCompletionRule::All, None, half),
                step(PathwayCompletionRule::All, None, full),
            ],
        );

        let progress = compute(&p, facts_for(done));
        assert_eq!(progress.percent_complete, Decimal::from(75));
        assert!(!progress.completed);
        assert_eq!(progress.steps_completed, 1);
    }

    #[test]
    fn test_pathway_any_needs_a_full_step() {
        let almost = vec![task(None), task(None), task(None)];
        let other = vec![task(None), task(None)];
        let done = vec![(almost[0].id, 1), (almost[1].id, 1)];
        let p = pathway(
            PathwayCompletionRule::Any,
            PathwayOrderMode::AnyOrder,
            vec![
                step(PathwayCompletionRule::All, None, almost.clone()),
                step(PathwayCompletionRule::All, None, other),
            ],
        );

        let progress = compute(&p, facts_for(done));
        assert_eq!(progress.steps[0].percent_complete, Decimal::new(6667, 2));
        assert_eq!(progress.percent_complete, Decimal::ZERO);
        assert!(!progress.completed);

        let all_three = almost.iter().map(|t| (t.id, 2)).collect();
        let progress = compute(&p, facts_for(all_three));
        assert_eq!(progress.percent_complete, HUNDRED);
        assert!(progress.completed);
    }

    #[test]
    fn test_empty_collections_are_vacuously_complete() {
        let p = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::All, None, Vec::new())],
        );
        let progress = compute(&p, facts_for(Vec::new()));
        assert!(progress.steps[0].completed);
        assert_eq!(progress.steps[0].percent_complete, HUNDRED);
        assert!(!progress.steps[0].completability.is_completable);

        let empty = pathway(PathwayCompletionRule::All, PathwayOrderMode::AnyOrder, Vec::new());
        let progress = compute(&empty, facts_for(Vec::new()));
        assert!(progress.completed);
        assert_eq!(progress.percent_complete, HUNDRED);
    }

    #[test]
    fn test_date_completed_tie_break() {
        let tasks = vec![task(None), task(None), task(None)];
        let done: Vec<(Uuid, i64)> = vec![(tasks[0].id, 2), (tasks[1].id, 1), (tasks[2].id, 3)];

        let all = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::All, None, tasks.clone())],
        );
        let progress = compute(&all, facts_for(done.clone()));
        assert_eq!(progress.steps[0].date_completed, Some(day(3)));
        assert_eq!(progress.date_completed, Some(day(3)));

        let any = pathway(
            PathwayCompletionRule::Any,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::Any, None, tasks)],
        );
        let progress = compute(&any, facts_for(done));
        assert_eq!(progress.steps[0].date_completed, Some(day(1)));
        assert_eq!(progress.date_completed, Some(day(1)));
    }

    #[test]
    fn test_sequential_steps_gate_attempts() {
        let first = vec![task(None)];
        let second = vec![task(None)];
        let done = vec![(first[0].id, 1)];
        let p = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::Sequential,
            vec![
                step(PathwayCompletionRule::All, Some(1), first),
                step(PathwayCompletionRule::All, Some(2), second.clone()),
                step(PathwayCompletionRule::All, Some(3), vec![task(None)]),
            ],
        );

        let progress = compute(&p, facts_for(done));
        assert!(progress.steps[0].is_attemptable);
        assert!(progress.steps[1].is_attemptable);
        assert!(!progress.steps[2].is_attemptable);

        let unordered = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::All, Some(2), second)],
        );
        assert!(compute(&unordered, facts_for(Vec::new())).steps[0].is_attemptable);
    }

    #[test]
    fn test_recompute_is_identical() {
        let tasks = vec![task(None), task(None)];
        let done = vec![(tasks[1].id, 5)];
        let p = pathway(
            PathwayCompletionRule::All,
            PathwayOrderMode::AnyOrder,
            vec![step(PathwayCompletionRule::All, None, tasks)],
        );

        let first = compute(&p, facts_for(done.clone()));
        let second = compute(&p, facts_for(done));
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
