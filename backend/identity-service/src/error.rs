use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Caller-visible classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Authentication,
    InactiveAccount,
    Forbidden,
    NotFound,
    Dependency,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Authentication => "authentication",
            ErrorKind::InactiveAccount => "inactive_account",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Dependency => "dependency",
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Password too weak: {0}")]
    WeakPassword(String),

    #[error("Invalid OAuth provider")]
    InvalidOAuthProvider,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid or expired verification code")]
    InvalidVerificationCode,

    #[error("Email unchanged")]
    EmailUnchanged,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Identity email does not match the account email")]
    IdentityEmailMismatch,

    #[error("Identity is already linked to another account")]
    IdentityAlreadyLinked,

    #[error("Cannot remove the last sign-in method")]
    LastSignInMethod,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Account is not active")]
    AccountInactive,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("User not found")]
    UserNotFound,

    #[error("Linked identity not found")]
    IdentityNotFound,

    #[error("Verification authority error: {0}")]
    VerificationAuthority(String),

    #[error("Role authority error: {0}")]
    RoleAuthority(String),

    #[error("File store error: {0}")]
    FileStore(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::InvalidEmail(_)
            | IdentityError::WeakPassword(_)
            | IdentityError::InvalidOAuthProvider
            | IdentityError::Validation(_)
            | IdentityError::InvalidVerificationCode
            | IdentityError::EmailUnchanged
            | IdentityError::IdentityEmailMismatch
            | IdentityError::LastSignInMethod => ErrorKind::Validation,
            IdentityError::EmailAlreadyExists
            | IdentityError::IdentityAlreadyLinked
            | IdentityError::Conflict(_) => ErrorKind::Conflict,
            IdentityError::InvalidCredentials
            | IdentityError::InvalidToken
            | IdentityError::TokenExpired => ErrorKind::Authentication,
            IdentityError::AccountInactive => ErrorKind::InactiveAccount,
            IdentityError::PermissionDenied => ErrorKind::Forbidden,
            IdentityError::UserNotFound | IdentityError::IdentityNotFound => ErrorKind::NotFound,
            IdentityError::VerificationAuthority(_)
            | IdentityError::RoleAuthority(_)
            | IdentityError::FileStore(_)
            | IdentityError::Database(_)
            | IdentityError::JwtError(_)
            | IdentityError::Internal(_) => ErrorKind::Dependency,
        }
    }

    /// Message safe to show to the end caller
    pub fn public_message(&self) -> String {
        match self.kind() {
            // Don't leak internal details in production
            ErrorKind::Dependency => "Service temporarily unavailable".to_string(),
            ErrorKind::Authentication => match self {
                IdentityError::InvalidCredentials => "Invalid credentials".to_string(),
                _ => "Invalid or expired token".to_string(),
            },
            // Constraint names stay in the logs
            ErrorKind::Conflict => match self {
                IdentityError::Conflict(_) => "Resource already exists".to_string(),
                _ => self.to_string(),
            },
            _ => self.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::InactiveAccount | ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Dependency => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        if self.kind() == ErrorKind::Dependency {
            tracing::error!(error = %self, "Request failed on a dependency");
        }

        let body = json!({
            "error": self.kind().as_str(),
            "message": self.public_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

// Conversions from external error types
impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => IdentityError::UserNotFound,
            StoreError::UniqueViolation(constraint) => IdentityError::Conflict(constraint),
            StoreError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                IdentityError::Database(msg)
            }
        }
    }
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

impl From<anyhow::Error> for IdentityError {
    fn from(err: anyhow::Error) -> Self {
        // Map token validation errors from crypto-core
        if crypto_core::jwt::is_expired_error(&err) {
            IdentityError::TokenExpired
        } else if err.to_string().contains("Token validation failed") {
            IdentityError::InvalidToken
        } else {
            IdentityError::Internal(format!("{:#}", err))
        }
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        IdentityError::Internal(format!("HTTP client error: {}", err))
    }
}

impl From<validator::ValidationErrors> for IdentityError {
    fn from(err: validator::ValidationErrors) -> Self {
        IdentityError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_errors_hide_detail() {
        let err = IdentityError::Database("relation users does not exist".into());
        assert_eq!(err.kind(), ErrorKind::Dependency);
        assert!(!err.public_message().contains("relation"));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err: IdentityError = StoreError::UniqueViolation("users_email_key".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(!err.public_message().contains("users_email_key"));
    }

    #[test]
    fn test_token_errors_share_public_message() {
        assert_eq!(
            IdentityError::InvalidToken.public_message(),
            IdentityError::TokenExpired.public_message()
        );
    }
}
