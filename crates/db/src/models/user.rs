use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use ts_rs::TS;
use uuid::Uuid;

/// Platform user as seen by the referral engine
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub has_social_login: bool,
    /// When the user finished identity onboarding; `None` while not onboarded
    pub date_onboarded: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub has_social_login: bool,
    pub date_onboarded: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_onboarded(&self) -> bool {
        self.date_onboarded.is_some()
    }

    pub async fn create<'e, E>(executor: E, data: &CreateUser) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users
                   (id, username, display_name, email, phone_number,
                    phone_number_confirmed, has_social_login, date_onboarded)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                email = excluded.email,
                phone_number = excluded.phone_number,
                phone_number_confirmed = excluded.phone_number_confirmed,
                has_social_login = excluded.has_social_login,
                date_onboarded = excluded.date_onboarded
            RETURNING *"#,
        )
        .bind(data.id)
        .bind(&data.username)
        .bind(&data.display_name)
        .bind(&data.email)
        .bind(&data.phone_number)
        .bind(data.phone_number_confirmed)
        .bind(data.has_social_login)
        .bind(data.date_onboarded)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_create_and_find_user() {
        let db = DBService::new_in_memory().await.unwrap();
        let data = CreateUser {
            id: Uuid::new_v4(),
            username: "thandi@example.com".to_string(),
            display_name: Some("Thandi".to_string()),
            email: Some("thandi@example.com".to_string()),
            phone_number: None,
            phone_number_confirmed: false,
            has_social_login: true,
            date_onboarded: None,
        };
        User::create(&db.pool, &data).await.unwrap();

        let user = User::find_by_id(&db.pool, data.id).await.unwrap().unwrap();
        assert!(user.has_social_login);
        assert!(!user.is_onboarded());
    }
}
