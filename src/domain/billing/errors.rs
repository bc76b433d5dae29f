//! Billing error taxonomy.
//!
//! # Categories
//!
//! | Category | Variants | HTTP Status |
//! |----------|----------|-------------|
//! | Configuration | ProviderNotConfigured, Configuration | 503 |
//! | Validation | PlanNotFound, Validation, InvalidWebhookSignature, NoLiveSubscription, InvalidState, TransactionNotFound | 400/401/404/422 |
//! | Provider | Provider | 502 / 504 |
//! | Conflict | Conflict | 409 |
//! | Persistence | Persistence | 503 |

use http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, UserId, ValidationError};

use super::ProviderKind;

/// Coarse error class used to decide between absorbing and propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Provider,
    Conflict,
    Persistence,
}

/// Errors surfaced by billing handlers and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("Payment provider '{0}' is not configured")]
    ProviderNotConfigured(ProviderKind),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    #[error("User {0} has no live subscription")]
    NoLiveSubscription(UserId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Payment provider error [{code}]: {message}")]
    Provider {
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl BillingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn provider(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        BillingError::Provider {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        BillingError::Persistence(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BillingError::ProviderNotConfigured(_) | BillingError::Configuration(_) => {
                ErrorCategory::Configuration
            }
            BillingError::PlanNotFound(_)
            | BillingError::Validation { .. }
            | BillingError::InvalidWebhookSignature
            | BillingError::NoLiveSubscription(_)
            | BillingError::InvalidState(_)
            | BillingError::TransactionNotFound(_) => ErrorCategory::Validation,
            BillingError::Provider { .. } => ErrorCategory::Provider,
            BillingError::Conflict(_) => ErrorCategory::Conflict,
            BillingError::Persistence(_) => ErrorCategory::Persistence,
        }
    }

    /// True when the caller (or the webhook sender) should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Provider { retryable, .. } => *retryable,
            BillingError::Persistence(_) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::ProviderNotConfigured(_) | BillingError::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BillingError::PlanNotFound(_)
            | BillingError::NoLiveSubscription(_)
            | BillingError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Validation { .. } => StatusCode::BAD_REQUEST,
            BillingError::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
            BillingError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Provider { code, .. } if code == "timeout" => StatusCode::GATEWAY_TIMEOUT,
            BillingError::Provider { .. } => StatusCode::BAD_GATEWAY,
            BillingError::Conflict(_) => StatusCode::CONFLICT,
            BillingError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::Conflict => BillingError::Conflict(err.message),
            ErrorCode::PlanNotFound => BillingError::PlanNotFound(err.message),
            ErrorCode::TransactionNotFound => BillingError::TransactionNotFound(err.message),
            ErrorCode::InvalidStateTransition => BillingError::InvalidState(err.message),
            ErrorCode::ValidationFailed | ErrorCode::InvalidFormat => BillingError::Validation {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            ErrorCode::ExternalServiceError => BillingError::provider("external", err.message, true),
            ErrorCode::NotFound
            | ErrorCode::SubscriptionNotFound
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => BillingError::Persistence(err.to_string()),
        }
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        let field = match &err {
            ValidationError::EmptyField { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. } => field.clone(),
        };
        BillingError::Validation {
            field,
            message: err.to_string(),
        }
    }
}
