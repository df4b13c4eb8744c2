use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Executor, FromRow, Row, Sqlite, Type, sqlite::SqliteRow};
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
#[sqlx(type_name = "referral_link_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReferralLinkStatus {
    /// Claimable
    #[default]
    Active,
    /// Withdrawn by the referrer or by program deletion
    Cancelled,
    /// Per-referrer or program cap reached
    LimitReached,
    /// Program ended
    Expired,
}

/// A referrer's shareable link into a program
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ReferralLink {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub program_id: Uuid,
    pub program_name: String,
    pub program_completion_limit_referee: Option<i32>,
    pub user_id: Uuid,
    pub user_display_name: Option<String>,
    pub status: ReferralLinkStatus,
    pub blocked: bool,
    pub blocked_date: Option<DateTime<Utc>>,
    pub completion_total: i32,
    /// Completions left under the program's per-referrer cap, counting this link only
    pub completion_balance: Option<i32>,
    pub pending_total: i64,
    pub expired_total: i64,
    #[ts(type = "number | null")]
    pub zlto_reward_cumulative: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for ReferralLink {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let program_completion_limit_referee: Option<i32> =
            row.try_get("program_completion_limit_referee")?;
        let completion_total: i32 = row.try_get("completion_total")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            program_id: row.try_get("program_id")?,
            program_name: row.try_get("program_name")?,
            program_completion_limit_referee,
            user_id: row.try_get("user_id")?,
            user_display_name: row.try_get("user_display_name")?,
            status: row.try_get("status")?,
            blocked: row.try_get("blocked")?,
            blocked_date: row.try_get("blocked_date")?,
            completion_total,
            completion_balance: program_completion_limit_referee
                .map(|limit| limit - completion_total),
            pending_total: row.try_get("pending_total")?,
            expired_total: row.try_get("expired_total")?,
            zlto_reward_cumulative: try_get_decimal(row, "zlto_reward_cumulative")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_LINK: &str = r#"SELECT l.*,
    p.name AS program_name,
    p.completion_limit_referee AS program_completion_limit_referee,
    u.display_name AS user_display_name,
    (SELECT COUNT(*) FROM referral_link_usages x
        WHERE x.link_id = l.id AND x.status = 'pending') AS pending_total,
    (SELECT COUNT(*) FROM referral_link_usages x
        WHERE x.link_id = l.id AND x.status = 'expired') AS expired_total
FROM referral_links l
JOIN programs p ON p.id = l.program_id
LEFT JOIN users u ON u.id = l.user_id"#;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateReferralLink {
    pub name: String,
    pub description: Option<String>,
    pub program_id: Uuid,
}

impl ReferralLink {
    pub async fn create<'a, A>(
        db: A,
        id: Uuid,
        user_id: Uuid,
        data: &CreateReferralLink,
    ) -> Result<Self, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO referral_links (
                id, name, description, program_id, user_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"#,
        )
        .bind(id)
        .bind(data.name.trim())
        .bind(&data.description)
        .bind(data.program_id)
        .bind(user_id)
        .bind(ReferralLinkStatus::Active)
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
        sqlx::query_as::<_, ReferralLink>(&format!("{SELECT_LINK} WHERE l.id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Case-insensitive name lookup scoped to one referrer and program
    pub async fn find_by_name<'e, E>(
        executor: E,
        user_id: Uuid,
        program_id: Uuid,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLink>(&format!(
            "{SELECT_LINK}
             WHERE l.user_id = $1 AND l.program_id = $2 AND l.name = $3 COLLATE NOCASE"
        ))
        .bind(user_id)
        .bind(program_id)
        .bind(name.trim())
        .fetch_optional(executor)
        .await
    }

    pub async fn find_active_by_user_and_program<'e, E>(
        executor: E,
        user_id: Uuid,
        program_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLink>(&format!(
            "{SELECT_LINK}
             WHERE l.user_id = $1 AND l.program_id = $2 AND l.status = 'active'
             ORDER BY l.created_at"
        ))
        .bind(user_id)
        .bind(program_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_by_user<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ReferralLink>(&format!(
            "{SELECT_LINK} WHERE l.user_id = $1 ORDER BY l.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(executor)
        .await
    }

    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE referral_links SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(name.trim())
        .bind(description)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_status<'e, E>(
        executor: E,
        id: Uuid,
        status: ReferralLinkStatus,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result =
            sqlx::query("UPDATE referral_links SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(status)
                .bind(Utc::now())
                .execute(executor)
                .await?;
        Ok(result.rows_affected())
    }

    /// Count one completion on the link and store its new cumulative referrer payout
    pub async fn record_completion<'e, E>(
        executor: E,
        id: Uuid,
        zlto_reward_cumulative: Option<Decimal>,
        status: ReferralLinkStatus,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_links
            SET completion_total = completion_total + 1,
                zlto_reward_cumulative = $2,
                status = $3,
                updated_at = $4
            WHERE id = $1"#,
        )
        .bind(id)
        .bind(to_text(zlto_reward_cumulative))
        .bind(status)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move every active link of a program to `status`
    pub async fn update_active_by_program_id<'e, E>(
        executor: E,
        program_id: Uuid,
        status: ReferralLinkStatus,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_links SET status = $2, updated_at = $3
            WHERE program_id = $1 AND status = 'active'"#,
        )
        .bind(program_id)
        .bind(status)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move every active or limit-reached link of a program to `status`. Used when the
    /// program itself ends or is deleted.
    pub async fn close_by_program_id<'e, E>(
        executor: E,
        program_id: Uuid,
        status: ReferralLinkStatus,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_links SET status = $2, updated_at = $3
            WHERE program_id = $1 AND status IN ('active', 'limitreached')"#,
        )
        .bind(program_id)
        .bind(status)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancel every active link a referrer holds, across programs
    pub async fn cancel_by_user_id<'e, E>(executor: E, user_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_links SET status = 'cancelled', updated_at = $2
            WHERE user_id = $1 AND status = 'active'"#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Flag or clear the block on all of a referrer's links; `None` clears it
    pub async fn set_blocked_by_user_id<'e, E>(
        executor: E,
        user_id: Uuid,
        blocked_date: Option<DateTime<Utc>>,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE referral_links
            SET blocked = $2, blocked_date = $3, updated_at = $4
            WHERE user_id = $1"#,
        )
        .bind(user_id)
        .bind(blocked_date.is_some())
        .bind(blocked_date)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DBService,
        models::program::{Program, tests::program_data},
    };

    #[tokio::test]
    async fn test_link_totals_and_name_lookup() {
        let db = DBService::new_in_memory().await.unwrap();
        let referrer = Uuid::new_v4();
        let mut data = program_data("Links");
        data.completion_limit_referee = Some(3);
        let program = Program::create(&db.pool, Uuid::new_v4(), &data, Uuid::new_v4())
            .await
            .unwrap();

        let link = ReferralLink::create(
            &db.pool,
            Uuid::new_v4(),
            referrer,
            &CreateReferralLink {
                name: "My Link".to_string(),
                description: None,
                program_id: program.id,
            },
        )
        .await
        .unwrap();
        assert_eq!(link.program_name, "Links");
        assert_eq!(link.completion_balance, Some(3));

        let found = ReferralLink::find_by_name(&db.pool, referrer, program.id, "my link")
            .await
            .unwrap();
        assert_eq!(found.map(|l| l.id), Some(link.id));

        ReferralLink::record_completion(
            &db.pool,
            link.id,
            Some(Decimal::from(10)),
            ReferralLinkStatus::Active,
        )
        .await
        .unwrap();
        let link = ReferralLink::find_by_id(&db.pool, link.id).await.unwrap().unwrap();
        assert_eq!(link.completion_total, 1);
        assert_eq!(link.completion_balance, Some(2));

        let closed =
            ReferralLink::close_by_program_id(&db.pool, program.id, ReferralLinkStatus::Expired)
                .await
                .unwrap();
        assert_eq!(closed, 1);
        let link = ReferralLink::find_by_id(&db.pool, link.id).await.unwrap().unwrap();
        assert_eq!(link.status, ReferralLinkStatus::Expired);
        assert_eq!(link.zlto_reward_cumulative, Some(Decimal::from(10)));
    }

    #[tokio::test]
    async fn test_block_flags_and_cancel_by_user() {
        let db = DBService::new_in_memory().await.unwrap();
        let referrer = Uuid::new_v4();
        let mut data = program_data("Blocked");
        data.multiple_links_allowed = true;
        let program = Program::create(&db.pool, Uuid::new_v4(), &data, Uuid::new_v4())
            .await
            .unwrap();
        let mut ids = Vec::new();
        for name in ["One", "Two"] {
            let link = ReferralLink::create(
                &db.pool,
                Uuid::new_v4(),
                referrer,
                &CreateReferralLink {
                    name: name.to_string(),
                    description: None,
                    program_id: program.id,
                },
            )
            .await
            .unwrap();
            ids.push(link.id);
        }
        ReferralLink::update_status(&db.pool, ids[1], ReferralLinkStatus::Expired)
            .await
            .unwrap();

        let flagged = ReferralLink::set_blocked_by_user_id(&db.pool, referrer, Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(flagged, 2);
        assert_eq!(ReferralLink::cancel_by_user_id(&db.pool, referrer).await.unwrap(), 1);

        let first = ReferralLink::find_by_id(&db.pool, ids[0]).await.unwrap().unwrap();
        assert!(first.blocked);
        assert!(first.blocked_date.is_some());
        assert_eq!(first.status, ReferralLinkStatus::Cancelled);
        let second = ReferralLink::find_by_id(&db.pool, ids[1]).await.unwrap().unwrap();
        assert_eq!(second.status, ReferralLinkStatus::Expired);

        ReferralLink::set_blocked_by_user_id(&db.pool, referrer, None).await.unwrap();
        let first = ReferralLink::find_by_id(&db.pool, ids[0]).await.unwrap().unwrap();
        assert!(!first.blocked);
        assert!(first.blocked_date.is_none());
    }
}
