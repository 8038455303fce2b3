use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IdentityError;

/// Account status matching database user_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "user_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// Created by a verified signup, not yet promoted
    New,
    Active,
    Inactive,
    /// Terminal: no operation here moves a user out of it
    Blocked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::New => "NEW",
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
            UserStatus::Blocked => "BLOCKED",
        }
    }

    /// Whether an administrative status change from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: UserStatus) -> bool {
        use UserStatus::*;
        match (self, next) {
            (from, to) if *from == to => true,
            (New, Active | Inactive | Blocked) => true,
            (Active, Inactive | Blocked) => true,
            (Inactive, Active | Blocked) => true,
            _ => false,
        }
    }
}

impl FromStr for UserStatus {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NEW" => Ok(UserStatus::New),
            "ACTIVE" => Ok(UserStatus::Active),
            "INACTIVE" => Ok(UserStatus::Inactive),
            "BLOCKED" => Ok(UserStatus::Blocked),
            other => Err(IdentityError::Validation(format!("unknown status: {other}"))),
        }
    }
}

/// Which statuses may authenticate
///
/// Deployments differ on whether a freshly verified `NEW` account may sign in before promotion,
/// so this is configuration rather than a hardcoded rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsableStatuses {
    ActiveOnly,
    #[default]
    ActiveOrNew,
}

impl UsableStatuses {
    pub fn allows(&self, status: UserStatus) -> bool {
        match self {
            UsableStatuses::ActiveOnly => status == UserStatus::Active,
            UsableStatuses::ActiveOrNew => {
                matches!(status, UserStatus::Active | UserStatus::New)
            }
        }
    }
}

impl FromStr for UsableStatuses {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "active_only" => Ok(UsableStatuses::ActiveOnly),
            "active_or_new" => Ok(UsableStatuses::ActiveOrNew),
            other => Err(IdentityError::Validation(format!(
                "unknown usable status policy: {other}"
            ))),
        }
    }
}

/// User model - core identity entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    /// Always stored normalized (trimmed, lower-case)
    pub email: String,
    /// Absent for accounts that only authenticate through a linked provider
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: Option<String>, status: UserStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_authenticate(&self, policy: UsableStatuses) -> bool {
        policy.allows(self.status)
    }
}
