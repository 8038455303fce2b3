/// Provider link database operations
///
/// Uniqueness of (provider_type, provider_user_id) is enforced by the
/// `provider_links_provider_identity_key` constraint, which concurrent OAuth callbacks rely on.
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ProviderLinkRepository, StoreError, StoreResult};
use crate::models::{ProviderLink, ProviderType};

#[derive(Clone)]
pub struct PgProviderLinkRepository {
    pool: PgPool,
}

impl PgProviderLinkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderLinkRepository for PgProviderLinkRepository {
    async fn create(&self, link: &ProviderLink) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_links (id, provider_type, provider_user_id, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(link.id)
        .bind(link.provider_type)
        .bind(&link.provider_user_id)
        .bind(link.user_id)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_provider(
        &self,
        provider_type: ProviderType,
        provider_user_id: &str,
    ) -> StoreResult<Option<ProviderLink>> {
        let link = sqlx::query_as::<_, ProviderLink>(
            "SELECT * FROM provider_links WHERE provider_type = $1 AND provider_user_id = $2",
        )
        .bind(provider_type)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<ProviderLink>> {
        let links = sqlx::query_as::<_, ProviderLink>(
            "SELECT * FROM provider_links WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM provider_links WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
