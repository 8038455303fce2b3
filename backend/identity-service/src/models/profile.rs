use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Display attributes, one per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    /// Handle or URL inside the local file store, never a third-party URL
    pub avatar_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn empty(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            display_name: None,
            avatar_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a patch into this profile
    ///
    /// `None` leaves a field untouched, a blank string clears it, anything else is stored trimmed.
    /// Returns whether anything changed.
    pub fn apply(&mut self, patch: &ProfilePatch) -> bool {
        let mut changed = merge_field(&mut self.display_name, patch.display_name.as_deref());
        changed |= merge_field(&mut self.avatar_ref, patch.avatar_ref.as_deref());
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

fn merge_field(field: &mut Option<String>, value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };

    let next = match value.trim() {
        "" => None,
        trimmed => Some(trimmed.to_string()),
    };
    if *field == next {
        return false;
    }
    *field = next;
    true
}

/// Partial profile update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}
