use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use ts_rs::TS;
use uuid::Uuid;

/// A referrer barred from creating links. Unblocking keeps the row as history.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Block {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reason: String,
    pub comment_block: Option<String>,
    pub comment_unblock: Option<String>,
    pub active: bool,
    pub created_by_user_id: Uuid,
    pub modified_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateBlock {
    pub user_id: Uuid,
    pub reason: String,
    pub comment: Option<String>,
}

impl Block {
    pub async fn create<'e, E>(
        executor: E,
        id: Uuid,
        data: &CreateBlock,
        created_by: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Block>(
            r#"INSERT INTO referral_blocks (
                id, user_id, reason, comment_block, active,
                created_by_user_id, modified_by_user_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 1, $5, $5, $6, $6)
            RETURNING *"#,
        )
        .bind(id)
        .bind(data.user_id)
        .bind(data.reason.trim())
        .bind(&data.comment)
        .bind(created_by)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn find_active_by_user_id<'e, E>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Block>(
            "SELECT * FROM referral_blocks WHERE user_id = $1 AND active = 1",
        )
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn deactivate<'e, E>(
        executor: E,
        id: Uuid,
        comment: Option<&str>,
        modified_by: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Block>(
            r#"UPDATE referral_blocks
            SET active = 0, comment_unblock = $2, modified_by_user_id = $3, updated_at = $4
            WHERE id = $1
            RETURNING *"#,
        )
        .bind(id)
        .bind(comment)
        .bind(modified_by)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }
}
