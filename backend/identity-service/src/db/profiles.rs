/// Profile database operations
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ProfileRepository, StoreError, StoreResult};
use crate::models::Profile;

#[derive(Clone)]
pub struct PgProfileRepository {
    pool: PgPool,
}

impl PgProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn create(&self, profile: &Profile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, display_name, avatar_ref, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.display_name)
        .bind(&profile.avatar_ref)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        let profile =
            sqlx::query_as::<_, Profile>("SELECT * FROM user_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(profile)
    }

    async fn update(&self, profile: &Profile) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_profiles
            SET display_name = $2, avatar_ref = $3, updated_at = $4
            WHERE user_id = $1
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.display_name)
        .bind(&profile.avatar_ref)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
