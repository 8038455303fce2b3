use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IdentityError;

/// External identity provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[sqlx(type_name = "provider_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Google,
    Github,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Google => "google",
            ProviderType::Github => "github",
        }
    }
}

impl FromStr for ProviderType {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(ProviderType::Google),
            "github" => Ok(ProviderType::Github),
            _ => Err(IdentityError::InvalidOAuthProvider),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable binding of one provider identity to one local user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProviderLink {
    pub id: Uuid,
    pub provider_type: ProviderType,
    pub provider_user_id: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ProviderLink {
    pub fn new(provider_type: ProviderType, provider_user_id: String, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_type,
            provider_user_id,
            user_id,
            created_at: Utc::now(),
        }
    }
}

/// Verified identity delivered by the upstream OAuth gateway
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthIdentity {
    pub provider_type: ProviderType,
    pub provider_user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}
