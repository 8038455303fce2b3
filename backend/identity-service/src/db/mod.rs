/// Persistence boundary for identity service
///
/// Services depend on the repository traits; `Pg*Repository` types implement them over sqlx.
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Profile, ProviderLink, ProviderType, User};

pub mod profiles;
pub mod provider_links;
pub mod users;

pub use profiles::PgProfileRepository;
pub use provider_links::PgProviderLinkRepository;
pub use users::PgUserRepository;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage outcomes the services branch on
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Carries the violated constraint name when the driver reports one
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::UniqueViolation(db_err.constraint().unwrap_or("unknown").to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user; a duplicate email yields `UniqueViolation`
    async fn create(&self, user: &User) -> StoreResult<()>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Lookup by already-normalized email
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Persist email, password hash and status
    async fn update(&self, user: &User) -> StoreResult<()>;
    /// Compensating removal for a signup that could not complete
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn list(&self, offset: i64, limit: i64) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn create(&self, profile: &Profile) -> StoreResult<()>;
    async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;
    async fn update(&self, profile: &Profile) -> StoreResult<()>;
    async fn delete(&self, user_id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait ProviderLinkRepository: Send + Sync {
    /// Insert a link; an existing (provider, provider user id) pair yields `UniqueViolation`
    async fn create(&self, link: &ProviderLink) -> StoreResult<()>;
    async fn find_by_provider(
        &self,
        provider_type: ProviderType,
        provider_user_id: &str,
    ) -> StoreResult<Option<ProviderLink>>;
    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<ProviderLink>>;
    /// Remove a link by id; `NotFound` when it is already gone
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}
