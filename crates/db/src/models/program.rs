use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Executor, FromRow, Row, Sqlite, Type, sqlite::SqliteRow};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::program_pathway::ProgramPathway;
use crate::decimal::{to_text, try_get_decimal};

/// Program lifecycle. Governs whether new links and new claims are accepted and what
/// happens to usages already in flight.
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
#[sqlx(type_name = "program_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgramStatus {
    /// New links and claims accepted; pending usages may complete
    #[default]
    Active,
    /// Manually paused; pending usages expire on their next progress check
    Inactive,
    /// End date reached or un-completable beyond grace; pending usages expire
    Expired,
    /// Program-wide completion cap hit; pending usages may still complete
    LimitReached,
    /// Pathway broken (a required opportunity is unavailable)
    UnCompletable,
    Deleted,
}

impl ProgramStatus {
    /// Statuses in which a pending usage is still allowed to complete
    pub fn allows_completion(&self) -> bool {
        matches!(self, ProgramStatus::Active | ProgramStatus::LimitReached)
    }

    /// Statuses an admin may still edit the configuration in
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            ProgramStatus::Active | ProgramStatus::Inactive | ProgramStatus::UnCompletable
        )
    }
}

/// Referral program configuration. Programs are platform-wide; at most one is the default.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Program {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image_id: Option<Uuid>,
    #[serde(skip)]
    pub image_storage_type: Option<String>,
    #[serde(skip)]
    pub image_key: Option<String>,
    /// Days a referee has after claiming to satisfy the gates; `None` means no window
    pub completion_window_in_days: Option<i32>,
    /// Completion cap applied to each referral link individually
    pub completion_limit_referee: Option<i32>,
    /// Program-wide completion cap
    pub completion_limit: Option<i32>,
    pub completion_total: i32,
    #[ts(type = "number | null")]
    pub zlto_reward_referrer: Option<Decimal>,
    #[ts(type = "number | null")]
    pub zlto_reward_referee: Option<Decimal>,
    /// Pool covering both referrer and referee payouts; `None` means no budget enforcement
    #[ts(type = "number | null")]
    pub zlto_reward_pool: Option<Decimal>,
    #[ts(type = "number | null")]
    pub zlto_reward_cumulative: Option<Decimal>,
    pub proof_of_personhood_required: bool,
    pub pathway_required: bool,
    pub multiple_links_allowed: bool,
    pub status: ProgramStatus,
    pub is_default: bool,
    pub date_start: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub expiration_notified_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub health_warning_sent_at: Option<DateTime<Utc>>,
    pub created_by_user_id: Uuid,
    pub modified_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Program {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            image_id: row.try_get("image_id")?,
            image_storage_type: row.try_get("image_storage_type")?,
            image_key: row.try_get("image_key")?,
            completion_window_in_days: row.try_get("completion_window_in_days")?,
            completion_limit_referee: row.try_get("completion_limit_referee")?,
            completion_limit: row.try_get("completion_limit")?,
            completion_total: row.try_get("completion_total")?,
            zlto_reward_referrer: try_get_decimal(row, "zlto_reward_referrer")?,
            zlto_reward_referee: try_get_decimal(row, "zlto_reward_referee")?,
            zlto_reward_pool: try_get_decimal(row, "zlto_reward_pool")?,
            zlto_reward_cumulative: try_get_decimal(row, "zlto_reward_cumulative")?,
            proof_of_personhood_required: row.try_get("proof_of_personhood_required")?,
            pathway_required: row.try_get("pathway_required")?,
            multiple_links_allowed: row.try_get("multiple_links_allowed")?,
            status: row.try_get("status")?,
            is_default: row.try_get("is_default")?,
            date_start: row.try_get("date_start")?,
            date_end: row.try_get("date_end")?,
            expiration_notified_at: row.try_get("expiration_notified_at")?,
            health_warning_sent_at: row.try_get("health_warning_sent_at")?,
            created_by_user_id: row.try_get("created_by_user_id")?,
            modified_by_user_id: row.try_get("modified_by_user_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Program with its countries and pathway tree resolved
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProgramWithPathway {
    #[serde(flatten)]
    pub program: Program,
    pub countries: Vec<String>,
    pub pathway: Option<ProgramPathway>,
}

impl std::ops::Deref for ProgramWithPathway {
    type Target = Program;
    fn deref(&self) -> &Self::Target {
        &self.program
    }
}

/// Column values written on create and update
#[derive(Debug, Clone)]
pub struct ProgramData {
    pub name: String,
    pub description: Option<String>,
    pub completion_window_in_days: Option<i32>,
    pub completion_limit_referee: Option<i32>,
    pub completion_limit: Option<i32>,
    pub zlto_reward_referrer: Option<Decimal>,
    pub zlto_reward_referee: Option<Decimal>,
    pub zlto_reward_pool: Option<Decimal>,
    pub proof_of_personhood_required: bool,
    pub pathway_required: bool,
    pub multiple_links_allowed: bool,
    pub date_start: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
}

impl Program {
    /// Remaining program-wide completions, `None` when uncapped
    pub fn completion_balance(&self) -> Option<i32> {
        self.completion_limit
            .map(|limit| limit - self.completion_total)
    }

    /// Remaining reward pool, `None` when no pool is configured
    pub fn zlto_reward_balance(&self) -> Option<Decimal> {
        self.zlto_reward_pool
            .map(|pool| pool - self.zlto_reward_cumulative.unwrap_or_default())
    }

    pub fn completion_limit_reached(&self) -> bool {
        self.completion_balance().is_some_and(|balance| balance <= 0)
    }

    pub async fn create<'e, E>(
        executor: E,
        id: Uuid,
        data: &ProgramData,
        user_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Program>(
            r#"INSERT INTO programs (
                id, name, description, completion_window_in_days, completion_limit_referee,
                completion_limit, zlto_reward_referrer, zlto_reward_referee, zlto_reward_pool,
                proof_of_personhood_required, pathway_required, multiple_links_allowed,
                status, is_default, date_start, date_end, created_by_user_id, modified_by_user_id,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, $14, $15,
                $16, $16, $17, $17
            )
            RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.completion_window_in_days)
        .bind(data.completion_limit_referee)
        .bind(data.completion_limit)
        .bind(to_text(data.zlto_reward_referrer))
        .bind(to_text(data.zlto_reward_referee))
        .bind(to_text(data.zlto_reward_pool))
        .bind(data.proof_of_personhood_required)
        .bind(data.pathway_required)
        .bind(data.multiple_links_allowed)
        .bind(ProgramStatus::Active)
        .bind(data.date_start)
        .bind(data.date_end)
        .bind(user_id)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        data: &ProgramData,
        user_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"UPDATE programs
            SET name = $2,
                description = $3,
                completion_window_in_days = $4,
                completion_limit_referee = $5,
                completion_limit = $6,
                zlto_reward_referrer = $7,
                zlto_reward_referee = $8,
                zlto_reward_pool = $9,
                proof_of_personhood_required = $10,
                pathway_required = $11,
                multiple_links_allowed = $12,
                date_start = $13,
                date_end = $14,
                expiration_notified_at = CASE
                    WHEN date_end IS $14 THEN expiration_notified_at
                    ELSE NULL
                END,
                modified_by_user_id = $15,
                updated_at = $16
            WHERE id = $1
            RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.completion_window_in_days)
        .bind(data.completion_limit_referee)
        .bind(data.completion_limit)
        .bind(to_text(data.zlto_reward_referrer))
        .bind(to_text(data.zlto_reward_referee))
        .bind(to_text(data.zlto_reward_pool))
        .bind(data.proof_of_personhood_required)
        .bind(data.pathway_required)
        .bind(data.multiple_links_allowed)
        .bind(data.date_start)
        .bind(data.date_end)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>("SELECT * FROM programs WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Case-insensitive lookup by name
    pub async fn find_by_name<'e, E>(executor: E, name: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>("SELECT * FROM programs WHERE name = $1 COLLATE NOCASE")
            .bind(name.trim())
            .fetch_optional(executor)
            .await
    }

    pub async fn find_default<'e, E>(executor: E) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>("SELECT * FROM programs WHERE is_default = 1")
            .fetch_optional(executor)
            .await
    }

    pub async fn clear_default<'e, E>(
        executor: E,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE programs
            SET is_default = 0, modified_by_user_id = $2, updated_at = $3
            WHERE id = $1 AND is_default = 1"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Make `id` the single default program. The previous default is cleared first so the
    /// partial unique index never sees two defaults.
    pub async fn set_default<'a, A>(db: A, id: Uuid, user_id: Uuid) -> Result<Self, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let now = Utc::now();

        sqlx::query(
            r#"UPDATE programs
            SET is_default = 0, modified_by_user_id = $2, updated_at = $3
            WHERE is_default = 1 AND id <> $1"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query_as::<_, Program>(
            r#"UPDATE programs
            SET is_default = 1, modified_by_user_id = $2, updated_at = $3
            WHERE id = $1
            RETURNING *"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn update_status<'e, E>(
        executor: E,
        id: Uuid,
        status: ProgramStatus,
        user_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"UPDATE programs
            SET status = $2,
                health_warning_sent_at = NULL,
                modified_by_user_id = $3,
                updated_at = $4
            WHERE id = $1
            RETURNING *"#,
        )
        .bind(id)
        .bind(status)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Leaves `updated_at` alone, the grace period of an un-completable program runs from it
    pub async fn mark_health_warning_sent<'e, E>(
        executor: E,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE programs SET health_warning_sent_at = $2
             WHERE id = $1 AND health_warning_sent_at IS NULL",
        )
        .bind(id)
        .bind(sent_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_expiration_notified<'e, E>(
        executor: E,
        id: Uuid,
        notified_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE programs SET expiration_notified_at = $2 WHERE id = $1")
            .bind(id)
            .bind(notified_at)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count one completion and store the new cumulative payout (and status when a cap flips it)
    pub async fn record_completion<'e, E>(
        executor: E,
        id: Uuid,
        zlto_reward_cumulative: Option<Decimal>,
        status: ProgramStatus,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"UPDATE programs
            SET completion_total = completion_total + 1,
                zlto_reward_cumulative = $2,
                status = $3,
                updated_at = $4
            WHERE id = $1
            RETURNING *"#,
        )
        .bind(id)
        .bind(to_text(zlto_reward_cumulative))
        .bind(status)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn find_countries<'e, E>(executor: E, id: Uuid) -> Result<Vec<String>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, String>(
            "SELECT country_code FROM program_countries
             WHERE program_id = $1 ORDER BY country_code",
        )
        .bind(id)
        .fetch_all(executor)
        .await
    }

    /// Replace the program's country set
    pub async fn set_countries<'a, A>(
        db: A,
        id: Uuid,
        countries: &[String],
    ) -> Result<(), sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        sqlx::query("DELETE FROM program_countries WHERE program_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        for code in countries {
            sqlx::query(
                "INSERT OR IGNORE INTO program_countries (program_id, country_code)
                 VALUES ($1, $2)",
            )
            .bind(id)
            .bind(code.trim().to_uppercase())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Load a program with its countries and pathway tree
    pub async fn find_with_pathway<'a, A>(
        db: A,
        id: Uuid,
    ) -> Result<Option<ProgramWithPathway>, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let Some(program) = Self::find_by_id(&mut *conn, id).await? else {
            return Ok(None);
        };
        let countries = Self::find_countries(&mut *conn, id).await?;
        let pathway = ProgramPathway::find_by_program_id(&mut *conn, id).await?;

        Ok(Some(ProgramWithPathway {
            program,
            countries,
            pathway,
        }))
    }

    /// Programs past their end date that have not yet been expired
    pub async fn find_expirable<'e, E>(
        executor: E,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"SELECT * FROM programs
            WHERE status IN ('active', 'inactive', 'uncompletable', 'limitreached')
              AND date_end IS NOT NULL
              AND date_end <= $1
            ORDER BY date_end
            LIMIT $2"#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Expirable programs ending within `[from, to]` whose admins have not been told yet
    pub async fn find_expiring<'e, E>(
        executor: E,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"SELECT * FROM programs
            WHERE status IN ('active', 'inactive', 'uncompletable', 'limitreached')
              AND date_end IS NOT NULL
              AND date_end >= $1
              AND date_end <= $2
              AND expiration_notified_at IS NULL
            ORDER BY date_end
            LIMIT $3"#,
        )
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Active and un-completable programs ordered by id, resuming after `after_id`
    pub async fn find_for_health_check<'e, E>(
        executor: E,
        after_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"SELECT * FROM programs
            WHERE status IN ('active', 'uncompletable')
              AND ($1 IS NULL OR id > $1)
            ORDER BY id
            LIMIT $2"#,
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Inactive or expired programs left untouched since `modified_before`
    pub async fn find_deletable<'e, E>(
        executor: E,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Program>(
            r#"SELECT * FROM programs
            WHERE status IN ('inactive', 'expired')
              AND updated_at <= $1
            ORDER BY updated_at
            LIMIT $2"#,
        )
        .bind(modified_before)
        .bind(limit)
        .fetch_all(executor)
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Duration;

    use super::*;
    use crate::DBService;

    pub(crate) fn program_data(name: &str) -> ProgramData {
        ProgramData {
            name: name.to_string(),
            description: None,
            completion_window_in_days: Some(30),
            completion_limit_referee: None,
            completion_limit: Some(10),
            zlto_reward_referrer: Some(Decimal::from(10)),
            zlto_reward_referee: Some(Decimal::from(5)),
            zlto_reward_pool: Some(Decimal::from(100)),
            proof_of_personhood_required: true,
            pathway_required: false,
            multiple_links_allowed: false,
            date_start: Utc::now() - Duration::days(1),
            date_end: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_round_trips_decimals() {
        let db = DBService::new_in_memory().await.unwrap();
        let data = program_data("Spring");
        let created = Program::create(&db.pool, Uuid::new_v4(), &data, Uuid::new_v4())
            .await
            .unwrap();

        let found = Program::find_by_id(&db.pool, created.id).await.unwrap().unwrap();
        assert_eq!(found.zlto_reward_pool, Some(Decimal::from(100)));
        assert_eq!(found.status, ProgramStatus::Active);
        assert_eq!(found.completion_balance(), Some(10));
        assert_eq!(found.zlto_reward_balance(), Some(Decimal::from(100)));
        assert!(!found.is_default);

        let by_name = Program::find_by_name(&db.pool, "  spring ").await.unwrap();
        assert_eq!(by_name.map(|p| p.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_set_default_moves_the_flag() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let first = Program::create(&db.pool, Uuid::new_v4(), &program_data("First"), user)
            .await
            .unwrap();
        let second = Program::create(&db.pool, Uuid::new_v4(), &program_data("Second"), user)
            .await
            .unwrap();

        Program::set_default(&db.pool, first.id, user).await.unwrap();
        Program::set_default(&db.pool, second.id, user).await.unwrap();

        let default = Program::find_default(&db.pool).await.unwrap().unwrap();
        assert_eq!(default.id, second.id);
        let first = Program::find_by_id(&db.pool, first.id).await.unwrap().unwrap();
        assert!(!first.is_default);
    }

    #[tokio::test]
    async fn test_find_expirable_only_returns_programs_past_end() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let mut ended = program_data("Ended");
        ended.date_end = Some(Utc::now() - Duration::hours(1));
        let mut running = program_data("Running");
        running.date_end = Some(Utc::now() + Duration::days(5));

        let ended = Program::create(&db.pool, Uuid::new_v4(), &ended, user).await.unwrap();
        Program::create(&db.pool, Uuid::new_v4(), &running, user).await.unwrap();

        let expirable = Program::find_expirable(&db.pool, Utc::now(), 10).await.unwrap();
        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].id, ended.id);
    }

    #[tokio::test]
    async fn test_find_expiring_skips_notified_until_end_date_moves() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let mut soon = program_data("Soon");
        soon.date_end = Some(Utc::now() + Duration::days(2));
        let mut later = program_data("Later");
        later.date_end = Some(Utc::now() + Duration::days(30));

        let soon_program = Program::create(&db.pool, Uuid::new_v4(), &soon, user).await.unwrap();
        Program::create(&db.pool, Uuid::new_v4(), &later, user).await.unwrap();

        let window_end = Utc::now() + Duration::days(7);
        let expiring = Program::find_expiring(&db.pool, Utc::now(), window_end, 10)
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].id, soon_program.id);

        Program::mark_expiration_notified(&db.pool, soon_program.id, Utc::now())
            .await
            .unwrap();
        let expiring = Program::find_expiring(&db.pool, Utc::now(), window_end, 10)
            .await
            .unwrap();
        assert!(expiring.is_empty());

        // Same end date keeps the marker, a new one clears it
        let updated = Program::update(&db.pool, soon_program.id, &soon, user).await.unwrap();
        assert!(updated.expiration_notified_at.is_some());
        soon.date_end = Some(Utc::now() + Duration::days(3));
        let updated = Program::update(&db.pool, soon_program.id, &soon, user).await.unwrap();
        assert!(updated.expiration_notified_at.is_none());
    }

    #[tokio::test]
    async fn test_health_warning_marker_survives_until_status_change() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let program = Program::create(&db.pool, Uuid::new_v4(), &program_data("Broken"), user)
            .await
            .unwrap();

        assert_eq!(
            Program::mark_health_warning_sent(&db.pool, program.id, Utc::now()).await.unwrap(),
            1
        );
        assert_eq!(
            Program::mark_health_warning_sent(&db.pool, program.id, Utc::now()).await.unwrap(),
            0
        );
        let marked = Program::find_by_id(&db.pool, program.id).await.unwrap().unwrap();
        assert!(marked.health_warning_sent_at.is_some());
        assert_eq!(marked.updated_at, program.updated_at);

        let changed = Program::update_status(&db.pool, program.id, ProgramStatus::Active, user)
            .await
            .unwrap();
        assert!(changed.health_warning_sent_at.is_none());
    }
}
