use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, FromRow, Sqlite, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "pathway_completion_rule", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PathwayCompletionRule {
    #[default]
    All,
    Any,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "pathway_order_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PathwayOrderMode {
    Sequential,
    #[default]
    AnyOrder,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "pathway_task_entity_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PathwayTaskEntityType {
    #[default]
    Opportunity,
}

/// Ordered checklist a referee must work through. Owned by exactly one program.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ProgramPathway {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub steps: Vec<ProgramPathwayStep>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ProgramPathwayStep {
    pub id: Uuid,
    pub pathway_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    /// Explicit order, only meaningful when the pathway is sequential
    #[sqlx(rename = "step_order")]
    pub order: Option<i32>,
    /// Zero-based position in the order the steps were submitted
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub tasks: Vec<ProgramPathwayTask>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ProgramPathwayTask {
    pub id: Uuid,
    pub step_id: Uuid,
    pub entity_type: PathwayTaskEntityType,
    pub opportunity_id: Option<Uuid>,
    #[sqlx(rename = "task_order")]
    pub order: Option<i32>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgramPathwayStep {
    /// Order shown to users: explicit order, else one-based submission position
    pub fn order_display(&self) -> i32 {
        self.order.unwrap_or(self.position + 1)
    }
}

impl ProgramPathwayTask {
    pub fn order_display(&self) -> i32 {
        self.order.unwrap_or(self.position + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProgramPathway {
    /// Kept when replacing an existing tree so ids stay stable across updates
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    pub steps: Vec<CreateProgramPathwayStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProgramPathwayStep {
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub rule: PathwayCompletionRule,
    pub order_mode: PathwayOrderMode,
    pub order: Option<i32>,
    pub tasks: Vec<CreateProgramPathwayTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProgramPathwayTask {
    pub id: Option<Uuid>,
    pub entity_type: PathwayTaskEntityType,
    pub opportunity_id: Option<Uuid>,
    pub order: Option<i32>,
}

impl ProgramPathway {
    /// Insert the whole tree, preserving submission order through `position`
    pub async fn create_tree<'a, A>(
        db: A,
        program_id: Uuid,
        data: &CreateProgramPathway,
    ) -> Result<Self, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let now = Utc::now();
        let pathway_id = data.id.unwrap_or_else(Uuid::new_v4);

        sqlx::query(
            r#"INSERT INTO program_pathways
                   (id, program_id, name, description, rule, order_mode, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"#,
        )
        .bind(pathway_id)
        .bind(program_id)
        .bind(data.name.trim())
        .bind(&data.description)
        .bind(data.rule)
        .bind(data.order_mode)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        for (step_position, step) in data.steps.iter().enumerate() {
            let step_id = step.id.unwrap_or_else(Uuid::new_v4);
            sqlx::query(
                r#"INSERT INTO program_pathway_steps
                       (id, pathway_id, name, description, rule, order_mode, step_order,
                        position, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)"#,
            )
            .bind(step_id)
            .bind(pathway_id)
            .bind(step.name.trim())
            .bind(&step.description)
            .bind(step.rule)
            .bind(step.order_mode)
            .bind(step.order)
            .bind(step_position as i32)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            for (task_position, task) in step.tasks.iter().enumerate() {
                sqlx::query(
                    r#"INSERT INTO program_pathway_tasks
                           (id, step_id, entity_type, opportunity_id, task_order, position,
                            created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"#,
                )
                .bind(task.id.unwrap_or_else(Uuid::new_v4))
                .bind(step_id)
                .bind(task.entity_type)
                .bind(task.opportunity_id)
                .bind(task.order)
                .bind(task_position as i32)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
        }

        Self::find_by_program_id(&mut *conn, program_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Load the program's pathway with steps and tasks in display order
    pub async fn find_by_program_id<'a, A>(
        db: A,
        program_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;

        let Some(mut pathway) = sqlx::query_as::<_, ProgramPathway>(
            "SELECT * FROM program_pathways WHERE program_id = $1",
        )
        .bind(program_id)
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let mut steps = sqlx::query_as::<_, ProgramPathwayStep>(
            r#"SELECT * FROM program_pathway_steps
            WHERE pathway_id = $1
            ORDER BY COALESCE(step_order, position + 1), position"#,
        )
        .bind(pathway.id)
        .fetch_all(&mut *conn)
        .await?;

        for step in steps.iter_mut() {
            step.tasks = sqlx::query_as::<_, ProgramPathwayTask>(
                r#"SELECT * FROM program_pathway_tasks
                WHERE step_id = $1
                ORDER BY COALESCE(task_order, position + 1), position"#,
            )
            .bind(step.id)
            .fetch_all(&mut *conn)
            .await?;
        }

        pathway.steps = steps;
        Ok(Some(pathway))
    }

    /// Remove the program's pathway; steps and tasks cascade
    pub async fn delete_by_program_id<'a, A>(db: A, program_id: Uuid) -> Result<u64, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let result = sqlx::query("DELETE FROM program_pathways WHERE program_id = $1")
            .bind(program_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Every opportunity referenced by a task, in display order
    pub fn opportunity_ids(&self) -> Vec<Uuid> {
        self.steps
            .iter()
            .flat_map(|step| step.tasks.iter())
            .filter_map(|task| task.opportunity_id)
            .collect()
    }
}
