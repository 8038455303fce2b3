/// Account self-service and administration
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::avatar::{AVATAR_FILE_KIND, FALLBACK_CONTENT_TYPE, FALLBACK_FILENAME};
use super::file_store::Upload;
use super::identity::{AuthPolicy, Collaborators};
use super::kafka_events::{UserEvent, USER_CREATED, USER_STATUS_CHANGED};
use crate::db::StoreError;
use crate::error::{IdentityError, Result};
use crate::models::{
    OAuthIdentity, Profile, ProfilePatch, ProviderLink, ProviderType, User, UserStatus,
};
use crate::security::hash_password;
use crate::validators::{normalize_email, validate_password, validate_remote_url};

pub const MAX_DISPLAY_NAME_CHARS: usize = 100;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_AVATAR_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

// Handles issued by the file store: opaque ids, optionally namespaced with '/'
static LOCAL_HANDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]{0,255}$")
        .expect("hardcoded handle regex is invalid - fix source code")
});

/// What `GET /v1/users/me` shows
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub user: User,
    pub profile: Profile,
    /// `None` when the role authority could not be reached
    pub role: Option<String>,
    pub providers: Vec<ProviderType>,
}

/// An image sent directly by the account owner
#[derive(Debug, Clone, Default)]
pub struct AvatarUpload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of attaching a provider identity to an account
#[derive(Debug, Clone, Serialize)]
pub struct LinkedIdentity {
    pub link: ProviderLink,
    pub profile: Profile,
}

#[derive(Clone)]
pub struct AccountService {
    deps: Collaborators,
    policy: AuthPolicy,
}

impl AccountService {
    pub fn new(deps: Collaborators, policy: AuthPolicy) -> Self {
        Self { deps, policy }
    }

    pub async fn get_me(&self, user_id: Uuid) -> Result<AccountView> {
        let user = self.require_user(user_id).await?;
        let profile = self.deps.load_profile(user_id).await?;

        let role = match self.deps.roles.resolve_role(user_id).await {
            Ok(role) => Some(role),
            Err(e) => {
                warn!(%user_id, error = %e, "Role lookup failed for account view");
                None
            }
        };

        let providers = self
            .deps
            .links
            .list_by_user(user_id)
            .await?
            .into_iter()
            .map(|link| link.provider_type)
            .collect();

        Ok(AccountView {
            user,
            profile,
            role,
            providers,
        })
    }

    /// Look up any user by id
    pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.require_user(user_id).await
    }

    /// Apply a partial profile update
    ///
    /// A remote avatar URL is ingested into the file store first and only the local handle is
    /// kept. When ingestion fails the stored avatar stays as it was and the rest of the patch
    /// still applies.
    pub async fn update_profile(
        &self,
        trace_id: &str,
        user_id: Uuid,
        mut patch: ProfilePatch,
    ) -> Result<Profile> {
        self.require_user(user_id).await?;

        if let Some(name) = patch.display_name.as_deref() {
            if name.trim().chars().count() > MAX_DISPLAY_NAME_CHARS {
                return Err(IdentityError::Validation(format!(
                    "display name must be at most {} characters",
                    MAX_DISPLAY_NAME_CHARS
                )));
            }
        }

        if let Some(raw) = patch.avatar_ref.take() {
            let raw = raw.trim();
            patch.avatar_ref = if raw.is_empty() {
                Some(String::new())
            } else {
                self.resolve_avatar_ref(trace_id, user_id, raw).await?
            };
        }

        let mut profile = self.deps.load_profile(user_id).await?;

        if profile.apply(&patch) {
            self.deps.profiles.update(&profile).await?;
            info!(%user_id, trace_id, "Profile updated");
        }
        Ok(profile)
    }

    /// Local handle to store, or `None` when a remote avatar could not be ingested
    async fn resolve_avatar_ref(
        &self,
        trace_id: &str,
        user_id: Uuid,
        raw: &str,
    ) -> Result<Option<String>> {
        if raw.contains("://") {
            validate_remote_url(raw)?;
            return match self.deps.avatars.ingest(trace_id, user_id, raw).await {
                Ok(handle) => Ok(Some(handle)),
                Err(e) => {
                    warn!(%user_id, trace_id, error = %e, "Avatar ingestion failed, keeping current avatar");
                    Ok(None)
                }
            };
        }

        if raw.contains("..") || !LOCAL_HANDLE.is_match(raw) {
            return Err(IdentityError::Validation(
                "avatar must be a file store handle or an http(s) URL".to_string(),
            ));
        }
        Ok(Some(raw.to_string()))
    }

    /// Store an uploaded image and make it the account's avatar
    pub async fn upload_avatar(
        &self,
        trace_id: &str,
        user_id: Uuid,
        upload: AvatarUpload,
    ) -> Result<Profile> {
        self.require_user(user_id).await?;

        if upload.bytes.is_empty() {
            return Err(IdentityError::Validation("avatar file is empty".to_string()));
        }
        if upload.bytes.len() > MAX_AVATAR_UPLOAD_BYTES {
            return Err(IdentityError::Validation(format!(
                "avatar exceeds {} bytes",
                MAX_AVATAR_UPLOAD_BYTES
            )));
        }

        // Keep only the final path component of client-supplied names
        let filename = upload
            .filename
            .as_deref()
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILENAME)
            .to_string();
        let content_type = upload
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        let handle = self
            .deps
            .files
            .upload(Upload {
                owner_id: user_id,
                file_kind: AVATAR_FILE_KIND,
                filename,
                content_type,
                bytes: upload.bytes,
            })
            .await?;

        let mut profile = self.deps.load_profile(user_id).await?;
        let patch = ProfilePatch {
            display_name: None,
            avatar_ref: Some(handle),
        };
        if profile.apply(&patch) {
            self.deps.profiles.update(&profile).await?;
        }

        info!(%user_id, trace_id, "Avatar uploaded");
        Ok(profile)
    }

    // ========================================================================
    // Linked identities
    // ========================================================================

    /// Link a provider identity to an existing account
    ///
    /// The identity's email must match the account. Re-attaching an identity the account already
    /// owns is a no-op; one owned by another account is rejected.
    pub async fn attach_identity(
        &self,
        trace_id: &str,
        user_id: Uuid,
        identity: OAuthIdentity,
    ) -> Result<LinkedIdentity> {
        let provider_user_id = identity.provider_user_id.trim();
        if provider_user_id.is_empty() {
            return Err(IdentityError::Validation(
                "provider user id is required".to_string(),
            ));
        }
        let email = normalize_email(&identity.email)?;
        let user = self.require_user(user_id).await?;
        if !user.email.eq_ignore_ascii_case(&email) {
            return Err(IdentityError::IdentityEmailMismatch);
        }

        if let Some(existing) = self
            .deps
            .links
            .find_by_provider(identity.provider_type, provider_user_id)
            .await?
        {
            return self.existing_link(user_id, existing).await;
        }

        let link = ProviderLink::new(identity.provider_type, provider_user_id.to_string(), user_id);
        match self.deps.links.create(&link).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                let winner = self
                    .deps
                    .links
                    .find_by_provider(identity.provider_type, provider_user_id)
                    .await?
                    .ok_or_else(|| {
                        IdentityError::Internal("provider link vanished after conflict".to_string())
                    })?;
                return self.existing_link(user_id, winner).await;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            %user_id,
            provider = %identity.provider_type,
            trace_id,
            "Attached provider identity"
        );
        let profile = self
            .deps
            .enrich_profile(
                trace_id,
                user_id,
                identity.display_name.as_deref(),
                identity.avatar_url.as_deref(),
            )
            .await?;
        Ok(LinkedIdentity { link, profile })
    }

    async fn existing_link(&self, user_id: Uuid, link: ProviderLink) -> Result<LinkedIdentity> {
        if link.user_id != user_id {
            return Err(IdentityError::IdentityAlreadyLinked);
        }
        let profile = self.deps.load_profile(user_id).await?;
        Ok(LinkedIdentity { link, profile })
    }

    /// Unlink a provider identity owned by the caller
    ///
    /// Identities owned by someone else are reported as not found. An account without a password
    /// keeps at least one linked identity.
    pub async fn remove_identity(
        &self,
        user_id: Uuid,
        provider_type: ProviderType,
        provider_user_id: &str,
    ) -> Result<()> {
        let link = self
            .deps
            .links
            .find_by_provider(provider_type, provider_user_id.trim())
            .await?
            .filter(|link| link.user_id == user_id)
            .ok_or(IdentityError::IdentityNotFound)?;

        let user = self.require_user(user_id).await?;
        if user.password_hash.is_none() && self.deps.links.list_by_user(user_id).await?.len() <= 1
        {
            return Err(IdentityError::LastSignInMethod);
        }

        self.deps.links.delete(link.id).await.map_err(|e| match e {
            StoreError::NotFound => IdentityError::IdentityNotFound,
            other => other.into(),
        })?;

        info!(%user_id, provider = %provider_type, "Removed provider identity");
        Ok(())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Create an active account on behalf of an administrator
    pub async fn create_user(
        &self,
        trace_id: &str,
        email: &str,
        password: &str,
        role: Option<&str>,
    ) -> Result<User> {
        let email = normalize_email(email)?;
        validate_password(password, self.policy.min_password_length)?;
        let role = match role.map(str::trim) {
            Some("") => return Err(IdentityError::Validation("role must not be empty".to_string())),
            Some(role) => role.to_string(),
            None => self.policy.default_role.clone(),
        };

        if self.deps.users.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::EmailAlreadyExists);
        }

        let user = User::new(email, Some(hash_password(password)?), UserStatus::Active);
        self.deps.create_account(&user).await?;
        self.deps.assign_role_or_rollback(&user, &role).await?;
        self.deps
            .publish(UserEvent::new(USER_CREATED, user.id, &user.email, trace_id))
            .await;

        info!(user_id = %user.id, role = %role, trace_id, "User created by administrator");
        Ok(user)
    }

    pub async fn change_status(
        &self,
        trace_id: &str,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<User> {
        let mut user = self.require_user(user_id).await?;
        if user.status == status {
            return Ok(user);
        }
        if !user.status.can_transition_to(status) {
            return Err(IdentityError::Validation(format!(
                "cannot change status from {} to {}",
                user.status.as_str(),
                status.as_str()
            )));
        }

        let previous = user.status;
        user.status = status;
        user.updated_at = chrono::Utc::now();
        self.deps.users.update(&user).await?;

        info!(
            %user_id,
            from = previous.as_str(),
            to = status.as_str(),
            trace_id,
            "User status changed"
        );
        self.deps
            .publish(UserEvent::new(USER_STATUS_CHANGED, user.id, &user.email, trace_id))
            .await;
        Ok(user)
    }

    /// Replace the user's role at the role authority
    pub async fn change_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        let role = role.trim();
        if role.is_empty() {
            return Err(IdentityError::Validation("role must not be empty".to_string()));
        }
        self.require_user(user_id).await?;

        self.deps.roles.assign_role(user_id, role).await?;
        info!(%user_id, role, "User role changed");
        Ok(())
    }

    pub async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        let offset = offset.max(0);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self.deps.users.list(offset, limit).await?)
    }

    /// Permission check for request authorization
    ///
    /// An unreachable role authority denies rather than failing the request.
    pub async fn authorize(&self, subject: Uuid, permission: &str) -> bool {
        match self.deps.roles.has_permission(subject, permission).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(user_id = %subject, permission, error = %e, "Permission check failed, denying");
                false
            }
        }
    }

    async fn require_user(&self, user_id: Uuid) -> Result<User> {
        self.deps
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)
    }
}
