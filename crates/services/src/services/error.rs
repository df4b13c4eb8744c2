use std::fmt;

use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// One failed validation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every rule a request failed, reported together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Record `message` against `field` when `failed` holds
    pub fn check(&mut self, failed: bool, field: &str, message: &str) {
        if failed {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    pub fn into_result(self) -> Result<(), ReferralError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ReferralError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("{0}")]
    NotFound(String),
    #[error("data inconsistency: {0}")]
    DataInconsistency(String),
    #[error("{0}")]
    InvalidOperation(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("lookup failed: {0}")]
    Lookup(String),
}

impl ReferralError {
    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        ReferralError::NotFound(format!("{entity} with id '{id}' does not exist"))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ReferralError::InvalidOperation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_collect_every_failure() {
        let mut errors = ValidationErrors::new();
        errors.check(true, "name", "Name is required");
        errors.check(false, "description", "never recorded");
        errors.check(true, "date_end", "End date must be on or after the start date");

        assert!(errors.has_field("name"));
        assert!(!errors.has_field("description"));
        let err = errors.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: name: Name is required; \
             date_end: End date must be on or after the start date"
        );
    }
}
