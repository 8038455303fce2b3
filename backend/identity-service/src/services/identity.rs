/// Identity resolution: signup, sign-in, OAuth linking, token refresh and email change
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::avatar::AvatarIngestor;
use super::file_store::FileStore;
use super::kafka_events::{EventPublisher, UserEvent, USER_CREATED, USER_EMAIL_CHANGED};
use super::role_authority::RoleAuthority;
use super::verification::VerificationAuthority;
use crate::db::{ProfileRepository, ProviderLinkRepository, StoreError, UserRepository};
use crate::error::{IdentityError, Result};
use crate::models::{
    OAuthIdentity, Profile, ProfilePatch, ProviderLink, UsableStatuses, User, UserStatus,
};
use crate::security::{
    hash_password, verify_against_dummy, verify_password, TokenPair, TokenSigner,
};
use crate::validators::{normalize_email, validate_password};

/// Authentication policy shared by the identity and account services
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub min_password_length: usize,
    pub default_role: String,
    pub usable_statuses: UsableStatuses,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            min_password_length: 8,
            default_role: "user".to_string(),
            usable_statuses: UsableStatuses::default(),
            access_ttl: Duration::from_secs(3600),
            refresh_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// External collaborators behind trait objects
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub links: Arc<dyn ProviderLinkRepository>,
    pub verification: Arc<dyn VerificationAuthority>,
    pub roles: Arc<dyn RoleAuthority>,
    pub avatars: Arc<dyn AvatarIngestor>,
    pub files: Arc<dyn FileStore>,
    pub events: Arc<dyn EventPublisher>,
}

impl Collaborators {
    /// Insert the user and an empty profile; nothing is left behind on failure
    pub(crate) async fn create_account(&self, user: &User) -> Result<Profile> {
        self.users.create(user).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => IdentityError::EmailAlreadyExists,
            other => other.into(),
        })?;

        let profile = Profile::empty(user.id);
        if let Err(e) = self.profiles.create(&profile).await {
            self.rollback_account(user.id).await;
            return Err(e.into());
        }
        Ok(profile)
    }

    /// Assign a role to a freshly created user, removing the user if that fails
    pub(crate) async fn assign_role_or_rollback(&self, user: &User, role: &str) -> Result<()> {
        if let Err(e) = self.roles.assign_role(user.id, role).await {
            error!(user_id = %user.id, error = %e, "Role assignment failed, rolling back user");
            self.rollback_account(user.id).await;
            return Err(e);
        }
        Ok(())
    }

    pub(crate) async fn rollback_account(&self, user_id: Uuid) {
        if let Err(e) = self.profiles.delete(user_id).await {
            error!(%user_id, error = %e, "Rollback failed to delete profile");
        }
        if let Err(e) = self.users.delete(user_id).await {
            error!(%user_id, error = %e, "Rollback failed to delete user");
        }
    }

    pub(crate) async fn load_profile(&self, user_id: Uuid) -> Result<Profile> {
        Ok(self
            .profiles
            .find_by_user(user_id)
            .await?
            .unwrap_or_else(|| Profile::empty(user_id)))
    }

    /// Best-effort merge of provider-supplied display name and avatar
    ///
    /// Avatar ingestion failures and profile write failures are logged, never returned.
    pub(crate) async fn enrich_profile(
        &self,
        trace_id: &str,
        user_id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Profile> {
        let mut profile = self.load_profile(user_id).await?;

        let mut patch = ProfilePatch {
            display_name: display_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            avatar_ref: None,
        };

        if let Some(avatar_url) = avatar_url.filter(|u| !u.trim().is_empty()) {
            match self.avatars.ingest(trace_id, user_id, avatar_url).await {
                Ok(handle) => patch.avatar_ref = Some(handle),
                Err(e) => {
                    warn!(%user_id, trace_id, error = %e, "Avatar ingestion failed, continuing without avatar");
                }
            }
        }

        let mut updated = profile.clone();
        if updated.apply(&patch) {
            match self.profiles.update(&updated).await {
                Ok(()) => profile = updated,
                Err(e) => {
                    warn!(%user_id, error = %e, "Profile enrichment not saved");
                }
            }
        }
        Ok(profile)
    }

    pub(crate) async fn publish(&self, event: UserEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(
                event_type = event.event_type,
                user_id = %event.user_id,
                error = %e,
                "Event publish failed"
            );
        }
    }
}

/// Result of every successful authentication
#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub user: User,
    pub profile: Profile,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct IdentityService {
    deps: Collaborators,
    signer: TokenSigner,
    policy: AuthPolicy,
}

impl IdentityService {
    pub fn new(deps: Collaborators, signer: TokenSigner, policy: AuthPolicy) -> Self {
        Self {
            deps,
            signer,
            policy,
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    // ========================================================================
    // Signup
    // ========================================================================

    /// Register a pending signup with the verification authority
    ///
    /// No user row exists until [`Self::verify_signup`] succeeds.
    pub async fn start_signup(&self, email: &str, password: &str) -> Result<String> {
        let email = normalize_email(email)?;
        validate_password(password, self.policy.min_password_length)?;

        self.deps
            .verification
            .start_registration(&email, password)
            .await
    }

    /// Redeem a signup code and create the account
    pub async fn verify_signup(
        &self,
        trace_id: &str,
        correlation: &str,
        code: &str,
    ) -> Result<AuthOutcome> {
        let pending = self
            .deps
            .verification
            .verify_registration(correlation, code)
            .await?;

        let email = normalize_email(&pending.email)?;
        if self.deps.users.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::EmailAlreadyExists);
        }

        let password_hash = hash_password(&pending.password)?;
        let user = User::new(email, Some(password_hash), UserStatus::New);
        let profile = self.deps.create_account(&user).await?;

        self.deps
            .assign_role_or_rollback(&user, &self.policy.default_role)
            .await?;
        self.deps
            .publish(UserEvent::new(USER_CREATED, user.id, &user.email, trace_id))
            .await;

        let role = match self.deps.roles.resolve_role(user.id).await {
            Ok(role) => role,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Role lookup failed after assignment, using assigned role");
                self.policy.default_role.clone()
            }
        };

        info!(user_id = %user.id, trace_id, "User signed up");
        let tokens = self.issue_tokens(&user, &role)?;
        Ok(AuthOutcome {
            user,
            profile,
            tokens,
        })
    }

    // ========================================================================
    // Sign-in
    // ========================================================================

    /// Password sign-in
    ///
    /// Unknown email and wrong password both fail with `InvalidCredentials`.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        let email = normalize_email(email)?;

        let Some(user) = self.deps.users.find_by_email(&email).await? else {
            verify_against_dummy(password);
            return Err(IdentityError::InvalidCredentials);
        };

        let Some(password_hash) = user.password_hash.as_deref() else {
            verify_against_dummy(password);
            return Err(IdentityError::InvalidCredentials);
        };
        if !verify_password(password, password_hash)? {
            return Err(IdentityError::InvalidCredentials);
        }

        self.ensure_usable(&user)?;
        self.authenticate(user).await
    }

    /// Exchange a refresh token for a fresh pair
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<AuthOutcome> {
        let claims = self.signer.verifier().validate_refresh(refresh_token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| IdentityError::InvalidToken)?;

        let user = self
            .deps
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        self.ensure_usable(&user)?;
        self.authenticate(user).await
    }

    // ========================================================================
    // OAuth linking
    // ========================================================================

    /// Reconcile a verified provider identity with local users
    ///
    /// Concurrent callbacks for the same provider identity converge on one link: the loser of the
    /// insert race adopts the winner's link and removes any account it created along the way.
    pub async fn handle_oauth_callback(
        &self,
        trace_id: &str,
        identity: OAuthIdentity,
    ) -> Result<AuthOutcome> {
        let provider_user_id = identity.provider_user_id.trim();
        if provider_user_id.is_empty() {
            return Err(IdentityError::Validation(
                "provider user id is required".to_string(),
            ));
        }
        let email = normalize_email(&identity.email)?;

        if let Some(link) = self
            .deps
            .links
            .find_by_provider(identity.provider_type, provider_user_id)
            .await?
        {
            return self.sign_in_linked(&link).await;
        }

        let (user, created) = self.find_or_create_oauth_user(&email).await?;
        if let Err(e) = self.ensure_usable(&user) {
            if created {
                self.deps.rollback_account(user.id).await;
            }
            return Err(e);
        }

        let link = ProviderLink::new(identity.provider_type, provider_user_id.to_string(), user.id);
        match self.deps.links.create(&link).await {
            Ok(()) => {
                info!(
                    user_id = %user.id,
                    provider = %identity.provider_type,
                    trace_id,
                    "Linked provider identity"
                );
            }
            Err(StoreError::UniqueViolation(_)) => {
                let winner = self
                    .deps
                    .links
                    .find_by_provider(identity.provider_type, provider_user_id)
                    .await?
                    .ok_or_else(|| {
                        IdentityError::Internal("provider link vanished after conflict".to_string())
                    })?;
                info!(
                    user_id = %winner.user_id,
                    provider = %identity.provider_type,
                    trace_id,
                    "Concurrent callback already linked this identity"
                );
                // The account made for this callback is now unreachable
                if created && winner.user_id != user.id {
                    self.deps.rollback_account(user.id).await;
                }
                return self.sign_in_linked(&winner).await;
            }
            Err(e) => {
                if created {
                    self.deps.rollback_account(user.id).await;
                }
                return Err(e.into());
            }
        }

        if created {
            self.deps
                .publish(UserEvent::new(USER_CREATED, user.id, &user.email, trace_id))
                .await;
        }

        let profile = self
            .deps
            .enrich_profile(
                trace_id,
                user.id,
                identity.display_name.as_deref(),
                identity.avatar_url.as_deref(),
            )
            .await?;
        let role = self.deps.roles.resolve_role(user.id).await?;
        let tokens = self.issue_tokens(&user, &role)?;
        Ok(AuthOutcome {
            user,
            profile,
            tokens,
        })
    }

    async fn sign_in_linked(&self, link: &ProviderLink) -> Result<AuthOutcome> {
        let user = self
            .deps
            .users
            .find_by_id(link.user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        self.ensure_usable(&user)?;
        self.authenticate(user).await
    }

    /// Existing account for the email, or a new ACTIVE one; the flag is true when created here
    async fn find_or_create_oauth_user(&self, email: &str) -> Result<(User, bool)> {
        if let Some(user) = self.deps.users.find_by_email(email).await? {
            return Ok((user, false));
        }

        let user = User::new(email.to_string(), None, UserStatus::Active);
        match self.deps.create_account(&user).await {
            Ok(_) => {}
            Err(IdentityError::EmailAlreadyExists) => {
                // Another callback created this email first
                let existing = self
                    .deps
                    .users
                    .find_by_email(email)
                    .await?
                    .ok_or(IdentityError::UserNotFound)?;
                return Ok((existing, false));
            }
            Err(e) => return Err(e),
        }

        self.deps
            .assign_role_or_rollback(&user, &self.policy.default_role)
            .await?;
        Ok((user, true))
    }

    // ========================================================================
    // Email change
    // ========================================================================

    pub async fn start_email_change(&self, user_id: Uuid, new_email: &str) -> Result<String> {
        let email = normalize_email(new_email)?;
        let user = self.require_user(user_id).await?;

        if user.email.eq_ignore_ascii_case(&email) {
            return Err(IdentityError::EmailUnchanged);
        }
        self.ensure_email_free(&email, user.id).await?;

        self.deps
            .verification
            .start_email_change(user.id, &email)
            .await
    }

    pub async fn verify_email_change(
        &self,
        trace_id: &str,
        user_id: Uuid,
        correlation: &str,
        code: &str,
    ) -> Result<User> {
        let confirmed = self
            .deps
            .verification
            .verify_email_change(correlation, code)
            .await?;
        let email = normalize_email(&confirmed)?;

        let mut user = self.require_user(user_id).await?;
        if user.email.eq_ignore_ascii_case(&email) {
            return Err(IdentityError::EmailUnchanged);
        }
        self.ensure_email_free(&email, user.id).await?;

        user.email = email;
        self.deps.users.update(&user).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => IdentityError::EmailAlreadyExists,
            other => other.into(),
        })?;

        self.deps
            .publish(UserEvent::new(USER_EMAIL_CHANGED, user.id, &user.email, trace_id))
            .await;
        Ok(user)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ensure_usable(&self, user: &User) -> Result<()> {
        if !user.can_authenticate(self.policy.usable_statuses) {
            return Err(IdentityError::AccountInactive);
        }
        Ok(())
    }

    async fn require_user(&self, user_id: Uuid) -> Result<User> {
        self.deps
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)
    }

    async fn ensure_email_free(&self, email: &str, owner: Uuid) -> Result<()> {
        match self.deps.users.find_by_email(email).await? {
            Some(other) if other.id != owner => Err(IdentityError::EmailAlreadyExists),
            _ => Ok(()),
        }
    }

    async fn authenticate(&self, user: User) -> Result<AuthOutcome> {
        let role = self.deps.roles.resolve_role(user.id).await?;
        let profile = self.deps.load_profile(user.id).await?;
        let tokens = self.issue_tokens(&user, &role)?;
        Ok(AuthOutcome {
            user,
            profile,
            tokens,
        })
    }

    fn issue_tokens(&self, user: &User, role: &str) -> Result<TokenPair> {
        let subject = user.id.to_string();
        let mut claims = Map::new();
        claims.insert("role".into(), Value::from(role));
        claims.insert("email".into(), Value::from(user.email.as_str()));

        let access = self
            .signer
            .issue_access_token(&subject, &claims, self.policy.access_ttl)
            .map_err(|e| IdentityError::JwtError(e.to_string()))?;
        let refresh = self
            .signer
            .issue_refresh_token(&subject, self.policy.refresh_ttl)
            .map_err(|e| IdentityError::JwtError(e.to_string()))?;

        Ok(TokenPair::bearer(access, refresh, self.policy.access_ttl))
    }
}
