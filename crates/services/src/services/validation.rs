//! Request validation for programs and links. One program rule set serves both create and
//! update; the mode only decides which node ids may be supplied.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use db::models::program_pathway::{
    CreateProgramPathway, CreateProgramPathwayStep, CreateProgramPathwayTask, PathwayCompletionRule,
    PathwayOrderMode, PathwayTaskEntityType,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::error::ValidationErrors;

const NAME_MAX: usize = 150;
const DESCRIPTION_MAX: usize = 500;
const REWARD_MAX: i64 = 2_000;
const POOL_MAX: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProgramRequest {
    /// Required when updating, absent when creating
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub completion_window_in_days: Option<i32>,
    pub completion_limit_referee: Option<i32>,
    pub completion_limit: Option<i32>,
    #[ts(type = "number | null")]
    pub zlto_reward_referrer: Option<Decimal>,
    #[ts(type = "number | null")]
    pub zlto_reward_referee: Option<Decimal>,
    #[ts(type = "number | null")]
    pub zlto_reward_pool: Option<Decimal>,
    #[serde(default)]
    pub proof_of_personhood_required: bool,
    #[serde(default)]
    pub pathway_required: bool,
    #[serde(default)]
    pub multiple_links_allowed: bool,
    #[serde(default)]
    pub is_default: bool,
    pub date_start: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub countries: Vec<String>,
    pub pathway: Option<PathwayRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PathwayRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub rule: PathwayCompletionRule,
    #[serde(default)]
    pub order_mode: PathwayOrderMode,
    #[serde(default)]
    pub steps: Vec<PathwayStepRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PathwayStepRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub rule: PathwayCompletionRule,
    #[serde(default)]
    pub order_mode: PathwayOrderMode,
    pub order: Option<i32>,
    #[serde(default)]
    pub tasks: Vec<PathwayTaskRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PathwayTaskRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub entity_type: PathwayTaskEntityType,
    pub entity_id: Option<Uuid>,
    pub order: Option<i32>,
}

impl From<&PathwayRequest> for CreateProgramPathway {
    fn from(request: &PathwayRequest) -> Self {
        CreateProgramPathway {
            id: request.id,
            name: request.name.clone(),
            description: request.description.clone(),
            rule: request.rule,
            order_mode: request.order_mode,
            steps: request
                .steps
                .iter()
                .map(|step| CreateProgramPathwayStep {
                    id: step.id,
                    name: step.name.clone(),
                    description: step.description.clone(),
                    rule: step.rule,
                    order_mode: step.order_mode,
                    order: step.order,
                    tasks: step
                        .tasks
                        .iter()
                        .map(|task| CreateProgramPathwayTask {
                            id: task.id,
                            entity_type: task.entity_type,
                            opportunity_id: task.entity_id,
                            order: task.order,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

fn is_whole(value: Decimal) -> bool {
    value.fract().is_zero()
}

fn too_long(value: &Option<String>, max: usize) -> bool {
    value
        .as_deref()
        .map(str::trim)
        .is_some_and(|v| v.chars().count() > max)
}

fn invalid_name(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.chars().count() > NAME_MAX
}

/// No orders at all, or every item ordered 1..N matching list position
pub fn is_sequential_ordered(orders: &[Option<i32>]) -> bool {
    if orders.iter().all(Option::is_none) {
        return true;
    }
    orders
        .iter()
        .enumerate()
        .all(|(index, order)| *order == Some(index as i32 + 1))
}

fn check_reward(errors: &mut ValidationErrors, field: &str, label: &str, value: Option<Decimal>) {
    let Some(value) = value else { return };
    errors.check(value <= Decimal::ZERO, field, &format!("{label} reward must be greater than 0."));
    errors.check(
        value > Decimal::from(REWARD_MAX),
        field,
        &format!("{label} reward may not exceed {REWARD_MAX}."),
    );
    errors.check(!is_whole(value), field, &format!("{label} reward must be a whole number."));
}

pub fn validate_program(request: &ProgramRequest, mode: ValidationMode) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if mode == ValidationMode::Update {
        errors.check(
            request.id.is_none_or(|id| id.is_nil()),
            "id",
            "Program id is required.",
        );
    }

    errors.check(
        invalid_name(&request.name),
        "name",
        "Please enter a program name (maximum 150 characters).",
    );
    errors.check(
        too_long(&request.description, DESCRIPTION_MAX),
        "description",
        "The description cannot be longer than 500 characters.",
    );
    errors.check(
        request.completion_window_in_days.is_some_and(|v| v <= 0),
        "completion_window_in_days",
        "Completion window must be greater than 0 days.",
    );
    errors.check(
        request.completion_limit_referee.is_some_and(|v| v <= 0),
        "completion_limit_referee",
        "Per-referrer completion limit must be greater than 0.",
    );
    errors.check(
        request.completion_limit.is_some_and(|v| v <= 0),
        "completion_limit",
        "Program completion limit must be greater than 0.",
    );

    check_reward(&mut errors, "zlto_reward_referrer", "Referrer", request.zlto_reward_referrer);
    check_reward(&mut errors, "zlto_reward_referee", "Referee", request.zlto_reward_referee);

    let rewards_total = request.zlto_reward_referrer.unwrap_or_default()
        + request.zlto_reward_referee.unwrap_or_default();

    if let Some(pool) = request.zlto_reward_pool {
        errors.check(
            pool <= Decimal::ZERO,
            "zlto_reward_pool",
            "Reward pool must be greater than 0.",
        );
        errors.check(
            pool < rewards_total,
            "zlto_reward_pool",
            "Reward pool must be at least the total of the referrer + referee rewards.",
        );
        errors.check(
            pool > Decimal::from(POOL_MAX),
            "zlto_reward_pool",
            "Reward pool may not exceed 10 million.",
        );
        errors.check(!is_whole(pool), "zlto_reward_pool", "Reward pool must be a whole number.");
    }

    let rewards_configured = rewards_total > Decimal::ZERO;
    let has_gate = request.proof_of_personhood_required || request.pathway_required;
    let has_referrer_cap = request.completion_limit_referee.unwrap_or(0) > 0;
    let has_program_cap = request.completion_limit.unwrap_or(0) > 0;

    errors.check(
        rewards_configured && !has_referrer_cap && !has_program_cap,
        "completion_limit",
        "When rewards are set, add at least one completion cap (per referrer or program-wide).",
    );
    errors.check(
        rewards_configured && !has_gate,
        "proof_of_personhood_required",
        "When rewards are set, enable Proof of Personhood or require a Pathway.",
    );
    errors.check(
        request.is_default && !has_gate,
        "is_default",
        "Default programs must enable Proof of Personhood or require a Pathway.",
    );
    errors.check(
        request.multiple_links_allowed && !has_gate && !has_referrer_cap,
        "multiple_links_allowed",
        "When multiple links are allowed, enable Proof of Personhood, \
         set a per-referrer cap, or require a Pathway.",
    );
    errors.check(
        request.date_end.is_some_and(|end| end < request.date_start),
        "date_end",
        "End Date cannot be earlier than the Start Date.",
    );

    match (&request.pathway, request.pathway_required) {
        (Some(_), false) => errors.add(
            "pathway",
            "Remove the pathway, this program does not require one.",
        ),
        (None, true) => errors.add("pathway", "Please add a pathway, this program requires one."),
        (Some(pathway), true) => validate_pathway(&mut errors, pathway, mode),
        (None, false) => {}
    }

    errors
}

fn validate_pathway(errors: &mut ValidationErrors, pathway: &PathwayRequest, mode: ValidationMode) {
    errors.check(
        pathway.id.is_some_and(|id| id.is_nil()),
        "pathway.id",
        "If a pathway ID is specified, it cannot be empty.",
    );
    errors.check(
        invalid_name(&pathway.name),
        "pathway.name",
        "Please enter a pathway name (maximum 150 characters).",
    );
    errors.check(
        too_long(&pathway.description, DESCRIPTION_MAX),
        "pathway.description",
        "The pathway description cannot be longer than 500 characters.",
    );
    errors.check(
        pathway.order_mode == PathwayOrderMode::Sequential
            && pathway.rule != PathwayCompletionRule::All,
        "pathway.order_mode",
        "Sequential ordering requires the 'All' rule.",
    );
    errors.check(
        pathway.steps.is_empty(),
        "pathway.steps",
        "Please add at least one step to the pathway.",
    );

    let creating_pathway = match mode {
        ValidationMode::Create => {
            errors.check(pathway.id.is_some(), "pathway.id", "A new pathway cannot include an Id.");
            true
        }
        ValidationMode::Update => pathway.id.is_none(),
    };

    let step_orders: Vec<Option<i32>> = pathway.steps.iter().map(|s| s.order).collect();
    errors.check(
        !is_sequential_ordered(&step_orders),
        "pathway.steps",
        "Step order must be 1, 2, 3... without gaps or duplicates, in the same order as listed.",
    );

    let mut step_names = HashSet::new();
    for (i, step) in pathway.steps.iter().enumerate() {
        let field = format!("pathway.steps[{i}]");

        errors.check(
            step.id.is_some_and(|id| id.is_nil()),
            &format!("{field}.id"),
            "If a step Id is specified, it cannot be empty.",
        );
        if step.id.is_some() {
            match mode {
                ValidationMode::Create => {
                    errors.add(format!("{field}.id"), "New steps cannot include an Id.")
                }
                ValidationMode::Update if creating_pathway => errors.add(
                    format!("{field}.id"),
                    "When creating a new pathway, step Ids cannot be specified.",
                ),
                ValidationMode::Update => {}
            }
        }

        errors.check(
            invalid_name(&step.name),
            &format!("{field}.name"),
            "Please enter a step name (maximum 150 characters).",
        );
        errors.check(
            !step_names.insert(step.name.trim().to_lowercase()),
            &format!("{field}.name"),
            "Step names must be unique within the pathway.",
        );
        errors.check(
            too_long(&step.description, DESCRIPTION_MAX),
            &format!("{field}.description"),
            "The step description cannot be longer than 500 characters.",
        );
        errors.check(
            step.order_mode == PathwayOrderMode::Sequential
                && step.rule != PathwayCompletionRule::All,
            &format!("{field}.order_mode"),
            "Sequential ordering requires the 'All' rule.",
        );
        errors.check(
            step.tasks.is_empty(),
            &format!("{field}.tasks"),
            "Please add at least one task to each step.",
        );

        let task_orders: Vec<Option<i32>> = step.tasks.iter().map(|t| t.order).collect();
        errors.check(
            !is_sequential_ordered(&task_orders),
            &format!("{field}.tasks"),
            "Task order must be 1, 2, 3... without gaps or duplicates, \
             in the same order as listed.",
        );
        errors.check(
            step.rule == PathwayCompletionRule::Any && task_orders.iter().any(Option::is_some),
            &format!("{field}.tasks"),
            "Tasks cannot be ordered when any one of them completes the step.",
        );

        let creating_step = step.id.is_none();
        let mut entities = HashSet::new();
        for (j, task) in step.tasks.iter().enumerate() {
            let task_field = format!("{field}.tasks[{j}]");

            errors.check(
                task.id.is_some_and(|id| id.is_nil()),
                &format!("{task_field}.id"),
                "If a task ID is specified, it cannot be empty.",
            );
            if task.id.is_some() {
                match mode {
                    ValidationMode::Create => {
                        errors.add(format!("{task_field}.id"), "New tasks cannot include an Id.")
                    }
                    ValidationMode::Update if creating_pathway => errors.add(
                        format!("{task_field}.id"),
                        "When creating a new pathway, task Ids cannot be specified.",
                    ),
                    ValidationMode::Update if creating_step => errors.add(
                        format!("{task_field}.id"),
                        "When creating a new step, task Ids cannot be specified.",
                    ),
                    ValidationMode::Update => {}
                }
            }

            match task.entity_id.filter(|id| !id.is_nil()) {
                None => errors.add(
                    format!("{task_field}.entity_id"),
                    "Each task must reference an entity.",
                ),
                Some(entity_id) => errors.check(
                    !entities.insert((task.entity_type, entity_id)),
                    &format!("{task_field}.entity_id"),
                    "A step cannot reference the same entity more than once.",
                ),
            }

            errors.check(
                task.order.is_some_and(|o| o < 1),
                &format!("{task_field}.order"),
                "Task order must be 1 or higher.",
            );
        }
    }
}

/// Name and description rules shared by link create and update
pub fn validate_link(name: &str, description: &Option<String>) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.check(
        invalid_name(name),
        "name",
        "Please enter a link name (maximum 150 characters).",
    );
    errors.check(
        too_long(description, DESCRIPTION_MAX),
        "description",
        "The description cannot be longer than 500 characters.",
    );
    errors
}

/// A block needs a reason; either comment is optional but bounded
pub fn validate_block(reason: &str, comment: &Option<String>) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.check(
        invalid_name(reason),
        "reason",
        "Please enter a reason for the block (maximum 150 characters).",
    );
    errors.check(
        too_long(comment, DESCRIPTION_MAX),
        "comment",
        "The comment cannot be longer than 500 characters.",
    );
    errors
}

pub fn validate_unblock(comment: &Option<String>) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.check(
        too_long(comment, DESCRIPTION_MAX),
        "comment",
        "The comment cannot be longer than 500 characters.",
    );
    errors
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn task(order: Option<i32>) -> PathwayTaskRequest {
        PathwayTaskRequest {
            id: None,
            entity_type: PathwayTaskEntityType::Opportunity,
            entity_id: Some(Uuid::new_v4()),
            order,
        }
    }

    fn step(name: &str, order: Option<i32>, tasks: Vec<PathwayTaskRequest>) -> PathwayStepRequest {
        PathwayStepRequest {
            id: None,
            name: name.to_string(),
            description: None,
            rule: PathwayCompletionRule::All,
            order_mode: PathwayOrderMode::AnyOrder,
            order,
            tasks,
        }
    }

    fn request() -> ProgramRequest {
        ProgramRequest {
            id: None,
            name: "Refer a friend".to_string(),
            description: None,
            completion_window_in_days: Some(30),
            completion_limit_referee: Some(5),
            completion_limit: Some(100),
            zlto_reward_referrer: Some(Decimal::from(10)),
            zlto_reward_referee: Some(Decimal::from(5)),
            zlto_reward_pool: Some(Decimal::from(1_000)),
            proof_of_personhood_required: true,
            pathway_required: true,
            multiple_links_allowed: false,
            is_default: false,
            date_start: Utc::now(),
            date_end: None,
            countries: vec!["ZA".to_string()],
            pathway: Some(PathwayRequest {
                id: None,
                name: "Onboarding".to_string(),
                description: None,
                rule: PathwayCompletionRule::All,
                order_mode: PathwayOrderMode::Sequential,
                steps: vec![
                    step("Learn", Some(1), vec![task(None)]),
                    step("Do", Some(2), vec![task(None), task(None)]),
                ],
            }),
        }
    }

    #[test]
    fn test_valid_request_passes() {
        let errors = validate_program(&request(), ValidationMode::Create);
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn test_reward_and_pool_rules() {
        let mut r = request();
        r.zlto_reward_referrer = Some(Decimal::new(105, 1));
        r.zlto_reward_referee = Some(Decimal::from(2_001));
        r.zlto_reward_pool = Some(Decimal::from(100));
        r.completion_limit = None;
        r.completion_limit_referee = None;

        let errors = validate_program(&r, ValidationMode::Create);
        assert!(errors.has_field("zlto_reward_referrer"));
        assert!(errors.has_field("zlto_reward_referee"));
        assert!(errors.has_field("zlto_reward_pool"));
        assert!(errors.has_field("completion_limit"));
    }

    #[test]
    fn test_gates_required_for_rewards_default_and_multiple_links() {
        let mut r = request();
        r.proof_of_personhood_required = false;
        r.pathway_required = false;
        r.pathway = None;
        r.is_default = true;
        r.multiple_links_allowed = true;
        r.completion_limit_referee = None;

        let errors = validate_program(&r, ValidationMode::Create);
        assert!(errors.has_field("proof_of_personhood_required"));
        assert!(errors.has_field("is_default"));
        assert!(errors.has_field("multiple_links_allowed"));
    }

    #[test]
    fn test_pathway_presence_must_match_requirement() {
        let mut r = request();
        r.pathway_required = false;
        assert!(validate_program(&r, ValidationMode::Create).has_field("pathway"));

        let mut r = request();
        r.pathway = None;
        assert!(validate_program(&r, ValidationMode::Create).has_field("pathway"));
    }

    #[test]
    fn test_ordering_rules() {
        assert!(is_sequential_ordered(&[None, None]));
        assert!(is_sequential_ordered(&[Some(1), Some(2), Some(3)]));
        assert!(!is_sequential_ordered(&[Some(1), None]));
        assert!(!is_sequential_ordered(&[Some(2), Some(1)]));
        assert!(!is_sequential_ordered(&[Some(1), Some(3)]));

        let mut r = request();
        if let Some(pathway) = r.pathway.as_mut() {
            pathway.rule = PathwayCompletionRule::Any;
            pathway.steps[1].rule = PathwayCompletionRule::Any;
            pathway.steps[1].tasks = vec![task(Some(1)), task(Some(2))];
        }
        let errors = validate_program(&r, ValidationMode::Create);
        assert!(errors.has_field("pathway.order_mode"));
        assert!(errors.has_field("pathway.steps[1].tasks"));
    }

    #[test]
    fn test_duplicate_steps_and_entities() {
        let mut r = request();
        let repeated = task(None);
        if let Some(pathway) = r.pathway.as_mut() {
            pathway.order_mode = PathwayOrderMode::AnyOrder;
            pathway.steps = vec![
                step("Learn", None, vec![repeated.clone(), repeated]),
                step("learn ", None, vec![task(None)]),
            ];
        }
        let errors = validate_program(&r, ValidationMode::Create);
        assert!(errors.has_field("pathway.steps[0].tasks[1].entity_id"));
        assert!(errors.has_field("pathway.steps[1].name"));
    }

    #[test]
    fn test_ids_by_mode() {
        let mut r = request();
        if let Some(pathway) = r.pathway.as_mut() {
            pathway.steps[0].id = Some(Uuid::new_v4());
        }
        let errors = validate_program(&r, ValidationMode::Create);
        assert!(errors.has_field("pathway.steps[0].id"));

        // Update without a program id, and step ids on a brand new pathway
        let errors = validate_program(&r, ValidationMode::Update);
        assert!(errors.has_field("id"));
        assert!(errors.has_field("pathway.steps[0].id"));

        // Existing pathway and step may carry ids; a new step's tasks may not
        r.id = Some(Uuid::new_v4());
        if let Some(pathway) = r.pathway.as_mut() {
            pathway.id = Some(Uuid::new_v4());
            pathway.steps[0].tasks[0].id = Some(Uuid::new_v4());
            pathway.steps[1].tasks[0].id = Some(Uuid::new_v4());
        }
        let errors = validate_program(&r, ValidationMode::Update);
        assert!(!errors.has_field("pathway.steps[0].id"));
        assert!(!errors.has_field("pathway.steps[0].tasks[0].id"));
        assert!(errors.has_field("pathway.steps[1].tasks[0].id"));
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut r = request();
        r.date_end = Some(r.date_start - Duration::days(1));
        assert!(validate_program(&r, ValidationMode::Create).has_field("date_end"));
    }

    #[test]
    fn test_link_name_required() {
        assert!(validate_link("  ", &None).has_field("name"));
        assert!(validate_link("Friends", &Some("x".repeat(501))).has_field("description"));
        assert!(validate_link("Friends", &None).is_empty());
    }

    #[test]
    fn test_block_reason_required() {
        let errors = validate_block("  ", &Some("x".repeat(501)));
        assert!(errors.has_field("reason"));
        assert!(errors.has_field("comment"));
        assert!(validate_block("Spam", &None).is_empty());
        assert!(validate_unblock(&Some("x".repeat(501))).has_field("comment"));
    }
}
