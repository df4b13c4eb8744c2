//! Read models for opportunities and their verified completions. Kept in sync by the
//! wider platform; the referral engine only reads them, except in tests and seeding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Executor, FromRow, Sqlite};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Opportunity {
    pub id: Uuid,
    pub title: String,
    /// Published, running and accepting verifications
    pub is_completable: bool,
    pub non_completable_reason: Option<String>,
    /// Country codes the opportunity is offered in; empty means worldwide
    #[sqlx(skip)]
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateOpportunity {
    pub id: Uuid,
    pub title: String,
    pub is_completable: bool,
    pub non_completable_reason: Option<String>,
    pub countries: Vec<String>,
}

impl Opportunity {
    pub async fn create<'a, A>(db: A, data: &CreateOpportunity) -> Result<Self, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        sqlx::query(
            r#"INSERT INTO opportunities (id, title, is_completable, non_completable_reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                is_completable = excluded.is_completable,
                non_completable_reason = excluded.non_completable_reason"#,
        )
        .bind(data.id)
        .bind(&data.title)
        .bind(data.is_completable)
        .bind(&data.non_completable_reason)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM opportunity_countries WHERE opportunity_id = $1")
            .bind(data.id)
            .execute(&mut *conn)
            .await?;
        for code in &data.countries {
            sqlx::query(
                "INSERT OR IGNORE INTO opportunity_countries (opportunity_id, country_code)
                 VALUES ($1, $2)",
            )
            .bind(data.id)
            .bind(code.trim().to_uppercase())
            .execute(&mut *conn)
            .await?;
        }

        Self::find_by_id(&mut *conn, data.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id<'a, A>(db: A, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let Some(mut opportunity) =
            sqlx::query_as::<_, Opportunity>("SELECT * FROM opportunities WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        else {
            return Ok(None);
        };

        opportunity.countries = sqlx::query_scalar::<_, String>(
            "SELECT country_code FROM opportunity_countries
             WHERE opportunity_id = $1 ORDER BY country_code",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(opportunity))
    }
}

/// A referee's verified completion of an opportunity
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct OpportunityVerification {
    pub user_id: Uuid,
    pub opportunity_id: Uuid,
    pub date_completed: DateTime<Utc>,
}

impl OpportunityVerification {
    pub async fn upsert<'e, E>(
        executor: E,
        user_id: Uuid,
        opportunity_id: Uuid,
        date_completed: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OpportunityVerification>(
            r#"INSERT INTO opportunity_verifications (user_id, opportunity_id, date_completed)
            VALUES ($1, $2, $3)
            ON CONFLICT(user_id, opportunity_id)
                DO UPDATE SET date_completed = excluded.date_completed
            RETURNING *"#,
        )
        .bind(user_id)
        .bind(opportunity_id)
        .bind(date_completed)
        .fetch_one(executor)
        .await
    }

    pub async fn find_completed<'e, E>(
        executor: E,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OpportunityVerification>(
            "SELECT * FROM opportunity_verifications WHERE user_id = $1 AND opportunity_id = $2",
        )
        .bind(user_id)
        .bind(opportunity_id)
        .fetch_optional(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_create_normalizes_countries_and_upserts() {
        let db = DBService::new_in_memory().await.unwrap();
        let id = Uuid::new_v4();
        let mut data = CreateOpportunity {
            id,
            title: "Learn to code".to_string(),
            is_completable: true,
            non_completable_reason: None,
            countries: vec!["za".to_string(), " KE ".to_string()],
        };
        let opportunity = Opportunity::create(&db.pool, &data).await.unwrap();
        assert_eq!(opportunity.countries, vec!["KE".to_string(), "ZA".to_string()]);

        data.is_completable = false;
        data.non_completable_reason = Some("Opportunity has ended".to_string());
        data.countries.clear();
        let opportunity = Opportunity::create(&db.pool, &data).await.unwrap();
        assert!(!opportunity.is_completable);
        assert!(opportunity.countries.is_empty());
    }

    #[tokio::test]
    async fn test_verification_lookup() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let opportunity = Uuid::new_v4();
        assert!(
            OpportunityVerification::find_completed(&db.pool, user, opportunity)
                .await
                .unwrap()
                .is_none()
        );

        OpportunityVerification::upsert(&db.pool, user, opportunity, Utc::now())
            .await
            .unwrap();
        assert!(
            OpportunityVerification::find_completed(&db.pool, user, opportunity)
                .await
                .unwrap()
                .is_some()
        );
    }
}
