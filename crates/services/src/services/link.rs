use std::sync::Arc;

use chrono::Utc;
use db::{
    DBService,
    models::{
        block::Block,
        program::{Program, ProgramStatus},
        referral_link::{CreateReferralLink, ReferralLink, ReferralLinkStatus},
    },
};
use serde::Deserialize;
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    directory::ReferralDirectory,
    error::{ReferralError, ValidationErrors},
    validation::validate_link,
};

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateReferralLink {
    pub name: String,
    pub description: Option<String>,
}

/// Referrer-facing link management
#[derive(Clone)]
pub struct LinkService {
    db: DBService,
    directory: Arc<dyn ReferralDirectory>,
}

fn name_taken(name: &str) -> ReferralError {
    let mut errors = ValidationErrors::new();
    errors.add(
        "name",
        format!(
            "A referral link with the name '{}' already exists for the current user",
            name.trim()
        ),
    );
    ReferralError::Validation(errors)
}

impl LinkService {
    pub fn new(db: DBService, directory: Arc<dyn ReferralDirectory>) -> Self {
        Self { db, directory }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<ReferralLink, ReferralError> {
        ReferralLink::find_by_id(&self.db.pool, id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Referral link", id))
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ReferralLink>, ReferralError> {
        Ok(ReferralLink::find_by_user(&self.db.pool, user_id).await?)
    }

    /// Link owned by `user_id`; anyone else gets `Unauthorized`
    async fn get_owned(&self, id: Uuid, user_id: Uuid) -> Result<ReferralLink, ReferralError> {
        let link = self.get_by_id(id).await?;
        if link.user_id != user_id {
            return Err(ReferralError::Unauthorized);
        }
        Ok(link)
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        request: CreateReferralLink,
    ) -> Result<ReferralLink, ReferralError> {
        validate_link(&request.name, &request.description).into_result()?;

        let program = Program::find_by_id(&self.db.pool, request.program_id)
            .await?
            .ok_or_else(|| ReferralError::not_found("Program", request.program_id))?;

        let now = Utc::now();
        if program.status != ProgramStatus::Active || program.date_start > now {
            return Err(ReferralError::invalid(format!(
                "Referral program '{}' is not active or has not started",
                program.name
            )));
        }
        if let Some(date_end) = program.date_end
            && date_end <= now
        {
            return Err(ReferralError::invalid(format!(
                "Referral program '{}' expired on '{}'",
                program.name,
                date_end.format("%Y-%m-%d")
            )));
        }
        if program.completion_limit_reached() {
            return Err(ReferralError::invalid(format!(
                "Referral program '{}' has reached its completion limit",
                program.name
            )));
        }

        if self.directory.user(user_id).await?.is_none() {
            return Err(ReferralError::not_found("User", user_id));
        }
        if Block::find_active_by_user_id(&self.db.pool, user_id).await?.is_some() {
            return Err(ReferralError::invalid(
                "You have been blocked from creating referral links",
            ));
        }

        if !program.multiple_links_allowed {
            let active =
                ReferralLink::find_active_by_user_and_program(&self.db.pool, user_id, program.id)
                    .await?;
            if !active.is_empty() {
                return Err(ReferralError::invalid(format!(
                    "Multiple active referral links are not allowed for program '{}'",
                    program.name
                )));
            }
        }

        if ReferralLink::find_by_name(&self.db.pool, user_id, program.id, &request.name)
            .await?
            .is_some()
        {
            return Err(name_taken(&request.name));
        }

        let id = Uuid::new_v4();
        let link = ReferralLink::create(&self.db.pool, id, user_id, &request).await?;
        info!(link_id = %id, program_id = %program.id, user_id = %user_id, "Referral link created");
        Ok(link)
    }

    pub async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        request: UpdateReferralLink,
    ) -> Result<ReferralLink, ReferralError> {
        validate_link(&request.name, &request.description).into_result()?;

        let link = self.get_owned(id, user_id).await?;
        if link.status != ReferralLinkStatus::Active {
            return Err(ReferralError::invalid(format!(
                "Referral link can no longer be updated (current status '{}'). Required state '{}'",
                link.status,
                ReferralLinkStatus::Active
            )));
        }

        let duplicate =
            ReferralLink::find_by_name(&self.db.pool, link.user_id, link.program_id, &request.name)
                .await?;
        if let Some(existing) = duplicate
            && existing.id != link.id
        {
            return Err(name_taken(&request.name));
        }

        ReferralLink::update(&self.db.pool, id, &request.name, request.description.as_deref())
            .await?;
        self.get_by_id(id).await
    }

    pub async fn cancel(&self, id: Uuid, user_id: Uuid) -> Result<ReferralLink, ReferralError> {
        let link = self.get_owned(id, user_id).await?;

        if link.status == ReferralLinkStatus::Cancelled {
            return Ok(link);
        }
        if link.status != ReferralLinkStatus::Active {
            return Err(ReferralError::invalid(format!(
                "Referral link cannot be cancelled (current status '{}'). Required state '{}'",
                link.status,
                ReferralLinkStatus::Active
            )));
        }

        ReferralLink::update_status(&self.db.pool, id, ReferralLinkStatus::Cancelled).await?;
        info!(link_id = %id, "Referral link cancelled");
        self.get_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use db::models::{
        program::{Program, ProgramData},
        user::{CreateUser, User},
    };
    use rust_decimal::Decimal;

    use super::*;
    use crate::services::directory::SqliteDirectory;

    async fn setup() -> (DBService, LinkService) {
        let db = DBService::new_in_memory().await.unwrap();
        let directory = Arc::new(SqliteDirectory::new(db.pool.clone()));
        let service = LinkService::new(db.clone(), directory);
        (db, service)
    }

    async fn user(db: &DBService) -> Uuid {
        let id = Uuid::new_v4();
        User::create(
            &db.pool,
            &CreateUser {
                id,
                username: format!("user-{id}"),
                display_name: Some("Referrer".to_string()),
                email: None,
                phone_number: None,
                phone_number_confirmed: false,
                has_social_login: false,
                date_onboarded: Some(Utc::now()),
            },
        )
        .await
        .unwrap();
        id
    }

    async fn program(db: &DBService, multiple_links_allowed: bool) -> Program {
        let data = ProgramData {
            name: format!("Program {}", Uuid::new_v4()),
            description: None,
            completion_window_in_days: Some(30),
            completion_limit_referee: Some(5),
            completion_limit: Some(10),
            zlto_reward_referrer: Some(Decimal::from(10)),
            zlto_reward_referee: Some(Decimal::from(5)),
            zlto_reward_pool: None,
            proof_of_personhood_required: true,
            pathway_required: false,
            multiple_links_allowed,
            date_start: Utc::now() - Duration::days(1),
            date_end: None,
        };
        Program::create(&db.pool, Uuid::new_v4(), &data, Uuid::new_v4())
            .await
            .unwrap()
    }

    fn link_request(program_id: Uuid, name: &str) -> CreateReferralLink {
        CreateReferralLink {
            name: name.to_string(),
            description: None,
            program_id,
        }
    }

    #[tokio::test]
    async fn test_single_link_per_program_unless_allowed() {
        let (db, service) = setup().await;
        let referrer = user(&db).await;
        let single = program(&db, false).await;
        let multiple = program(&db, true).await;

        service.create(referrer, link_request(single.id, "First")).await.unwrap();
        let err = service
            .create(referrer, link_request(single.id, "Second"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::InvalidOperation(_)));

        service.create(referrer, link_request(multiple.id, "First")).await.unwrap();
        service.create(referrer, link_request(multiple.id, "Second")).await.unwrap();
        let err = service
            .create(referrer, link_request(multiple.id, "SECOND"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::Validation(e) if e.has_field("name")));
    }

    #[tokio::test]
    async fn test_create_requires_active_started_program() {
        let (db, service) = setup().await;
        let referrer = user(&db).await;
        let program = program(&db, false).await;
        Program::update_status(&db.pool, program.id, ProgramStatus::Inactive, Uuid::new_v4())
            .await
            .unwrap();

        let err = service
            .create(referrer, link_request(program.id, "Mine"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReferralError::InvalidOperation(m) if m.contains("is not active or has not started")
        ));
    }

    #[tokio::test]
    async fn test_link_json_carries_completion_balance() {
        let (db, service) = setup().await;
        let referrer = user(&db).await;
        let program = program(&db, false).await;
        let link = service.create(referrer, link_request(program.id, "Mine")).await.unwrap();

        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["completion_balance"], 5);
        assert_eq!(json["blocked"], false);
        assert_eq!(json["user_display_name"], "Referrer");
    }

    #[tokio::test]
    async fn test_cancel_is_owner_only_and_idempotent() {
        let (db, service) = setup().await;
        let referrer = user(&db).await;
        let program = program(&db, false).await;
        let link = service.create(referrer, link_request(program.id, "Mine")).await.unwrap();

        let err = service.cancel(link.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ReferralError::Unauthorized));

        let cancelled = service.cancel(link.id, referrer).await.unwrap();
        assert_eq!(cancelled.status, ReferralLinkStatus::Cancelled);
        let again = service.cancel(link.id, referrer).await.unwrap();
        assert_eq!(again.status, ReferralLinkStatus::Cancelled);

        let err = service
            .update(
                link.id,
                referrer,
                UpdateReferralLink {
                    name: "Renamed".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::InvalidOperation(_)));
    }
}
