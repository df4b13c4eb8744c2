use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{
    Acquire, Executor, FromRow, QueryBuilder, Row, Sqlite, SqlitePool, Type, sqlite::SqliteRow,
};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::decimal::{to_text, try_get_decimal};

#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "referral_link_usage_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReferralLinkUsageStatus {
    #[default]
    Pending,
    Completed,
    Expired,
}

/// A referee's engagement with a program, created when they claim a link.
/// One per referee per program.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ReferralLinkUsage {
    pub id: Uuid,
    pub program_id: Uuid,
    pub program_name: String,
    pub program_completion_window_in_days: Option<i32>,
    pub program_date_end: Option<DateTime<Utc>>,
    pub link_id: Uuid,
    pub link_name: String,
    pub user_id_referrer: Uuid,
    pub user_display_name_referrer: Option<String>,
    pub user_id: Uuid,
    pub user_display_name: Option<String>,
    pub status: ReferralLinkUsageStatus,
    /// Amount actually paid to the referee once completed
    #[ts(type = "number | null")]
    pub zlto_reward_referee: Option<Decimal>,
    #[ts(type = "number | null")]
    pub zlto_reward_referrer: Option<Decimal>,
    pub date_claimed: DateTime<Utc>,
    pub date_completed: Option<DateTime<Utc>>,
    pub date_expired: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for ReferralLinkUsage {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            program_id: row.try_get("program_id")?,
            program_name: row.try_get("program_name")?,
            program_completion_window_in_days: row.try_get("program_completion_window_in_days")?,
            program_date_end: row.try_get("program_date_end")?,
            link_id: row.try_get("link_id")?,
            link_name: row.try_get("link_name")?,
            user_id_referrer: row.try_get("user_id_referrer")?,
            user_display_name_referrer: row.try_get("user_display_name_referrer")?,
            user_id: row.try_get("user_id")?,
            user_display_name: row.try_get("user_display_name")?,
            status: row.try_get("status")?,
            zlto_reward_referee: try_get_decimal(row, "zlto_reward_referee")?,
            zlto_reward_referrer: try_get_decimal(row, "zlto_reward_referrer")?,
            date_claimed: row.try_get("date_claimed")?,
            date_completed: row.try_get("date_completed")?,
            date_expired: row.try_get("date_expired")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_USAGE: &str = r#"SELECT u.*,
    p.name AS program_name,
    p.completion_window_in_days AS program_completion_window_in_days,
    p.date_end AS program_date_end,
    l.name AS link_name,
    l.user_id AS user_id_referrer,
    ur.display_name AS user_display_name_referrer,
    ue.display_name AS user_display_name
FROM referral_link_usages u
JOIN programs p ON p.id = u.program_id
JOIN referral_links l ON l.id = u.link_id
LEFT JOIN users ur ON ur.id = l.user_id
LEFT JOIN users ue ON ue.id = u.user_id"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct ReferralLinkUsageSearchFilter {
    pub program_id: Option<Uuid>,
    pub link_id: Option<Uuid>,
    pub user_id_referrer: Option<Uuid>,
    pub user_id_referee: Option<Uuid>,
    #[serde(default)]
    pub statuses: Vec<ReferralLinkUsageStatus>,
    /// Inclusive lower bound on the claim date
    pub date_start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the claim date
    pub date_end: Option<DateTime<Utc>>,
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ReferralLinkUsageSearchResults {
    pub total_count: i64,
    pub items: Vec<ReferralLinkUsage>,
}

impl ReferralLinkUsage {
    /// Whole days left before the usage can no longer complete: the earlier of the claim
    /// window end and the program end date. `None` when neither applies.
    pub fn time_remaining_in_days(&self, now: DateTime<Utc>) -> Option<i64> {
        let window_end = self
            .program_completion_window_in_days
            .map(|days| self.date_claimed + Duration::days(days as i64));
        let effective_end = match (window_end, self.program_date_end) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };

        let remaining = effective_end - now;
        if remaining <= Duration::zero() {
            return Some(0);
        }
        let seconds = remaining.num_seconds();
        Some((seconds + 86_399) / 86_400)
    }

    /// End of the day by which the referee should finish
    pub fn date_complete_by(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = self.time_remaining_in_days(now)?;
        let date = self
            .date_claimed
            .date_naive()
            .checked_add_days(Days::new(days.max(0) as u64))?;
        let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?;
        Some(date.and_time(end_of_day).and_utc())
    }

    pub async fn create<'a, A>(
        db: A,
        id: Uuid,
        program_id: Uuid,
        link_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO referral_link_usages
                   (id, program_id, link_id, user_id, status, date_claimed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $6)"#,
        )
        .bind(id)
        .bind(program_id)
        .bind(link_id)
        .bind(user_id)
        .bind(ReferralLinkUsageStatus::Pending)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::find_by_id(&mut *conn, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLinkUsage>(&format!("{SELECT_USAGE} WHERE u.id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_user_and_program<'e, E>(
        executor: E,
        user_id: Uuid,
        program_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLinkUsage>(&format!(
            "{SELECT_USAGE} WHERE u.user_id = $1 AND u.program_id = $2"
        ))
        .bind(user_id)
        .bind(program_id)
        .fetch_optional(executor)
        .await
    }

    /// Every usage of a referee across programs, newest first
    pub async fn find_by_user<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLinkUsage>(&format!(
            "{SELECT_USAGE} WHERE u.user_id = $1 ORDER BY u.date_claimed DESC"
        ))
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_pending_by_user<'e, E>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLinkUsage>(&format!(
            "{SELECT_USAGE} WHERE u.user_id = $1 AND u.status = 'pending' ORDER BY u.date_claimed"
        ))
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    /// Pending usages whose completion window has elapsed
    pub async fn find_expirable<'e, E>(
        executor: E,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLinkUsage>(&format!(
            r#"{SELECT_USAGE}
            WHERE u.status = 'pending'
              AND p.completion_window_in_days IS NOT NULL
              AND julianday(u.date_claimed) + p.completion_window_in_days <= julianday($1)
            ORDER BY u.date_claimed
            LIMIT $2"#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Returns the number of rows moved; zero when the usage was no longer pending
    pub async fn mark_completed<'e, E>(
        executor: E,
        id: Uuid,
        zlto_reward_referee: Option<Decimal>,
        zlto_reward_referrer: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_link_usages
            SET status = 'completed',
                zlto_reward_referee = $2,
                zlto_reward_referrer = $3,
                date_completed = $4,
                updated_at = $4
            WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(to_text(zlto_reward_referee))
        .bind(to_text(zlto_reward_referrer))
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_expired<'e, E>(
        executor: E,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_link_usages
            SET status = 'expired', date_expired = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn expire_pending_by_program_id<'e, E>(
        executor: E,
        program_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_link_usages
            SET status = 'expired', date_expired = $2, updated_at = $2
            WHERE program_id = $1 AND status = 'pending'"#,
        )
        .bind(program_id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn search(
        pool: &SqlitePool,
        filter: &ReferralLinkUsageSearchFilter,
    ) -> Result<ReferralLinkUsageSearchResults, sqlx::Error> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM referral_link_usages u JOIN referral_links l ON l.id = u.link_id",
        );
        push_search_conditions(&mut count, filter);
        let total_count: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(SELECT_USAGE);
        push_search_conditions(&mut select, filter);
        select.push(" ORDER BY u.date_claimed DESC, u.id");

        if let Some(page_size) = filter.page_size.filter(|size| *size > 0) {
            let page_number = filter.page_number.unwrap_or(1).max(1);
            select.push(" LIMIT ");
            select.push_bind(page_size);
            select.push(" OFFSET ");
            select.push_bind((page_number - 1) * page_size);
        }

        let items = select
            .build_query_as::<ReferralLinkUsage>()
            .fetch_all(pool)
            .await?;

        Ok(ReferralLinkUsageSearchResults { total_count, items })
    }
}

fn push_search_conditions<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    filter: &'a ReferralLinkUsageSearchFilter,
) {
    builder.push(" WHERE 1 = 1");
    if let Some(program_id) = filter.program_id {
        builder.push(" AND u.program_id = ").push_bind(program_id);
    }
    if let Some(link_id) = filter.link_id {
        builder.push(" AND u.link_id = ").push_bind(link_id);
    }
    if let Some(referrer) = filter.user_id_referrer {
        builder.push(" AND l.user_id = ").push_bind(referrer);
    }
    if let Some(referee) = filter.user_id_referee {
        builder.push(" AND u.user_id = ").push_bind(referee);
    }
    if !filter.statuses.is_empty() {
        builder.push(" AND u.status IN (");
        let mut separated = builder.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(")");
    }
    if let Some(date_start) = filter.date_start {
        builder.push(" AND u.date_claimed >= ").push_bind(date_start);
    }
    if let Some(date_end) = filter.date_end {
        builder.push(" AND u.date_claimed <= ").push_bind(date_end);
    }
}
