// In-memory collaborators for exercising identity flows without Postgres or live authorities
#![allow(dead_code)]

use async_trait::async_trait;
use identity_service::db::{
    ProfileRepository, ProviderLinkRepository, StoreError, StoreResult, UserRepository,
};
use identity_service::error::{IdentityError, Result};
use identity_service::models::{Profile, ProviderLink, ProviderType, User};
use identity_service::security::{KeyMaterial, TokenSigner};
use identity_service::services::{
    AccountService, AuthPolicy, AvatarError, AvatarIngestor, Collaborators, EventPublisher,
    FileStore, IdentityService, PendingRegistration, RoleAuthority, Upload, UserEvent,
    VerificationAuthority,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-secret-key-for-identity-flows";
pub const TEST_ISSUER: &str = "user-service";
pub const TEST_AUDIENCE: &str = "frontend";
pub const VALID_CODE: &str = "424242";
pub const AVATAR_HANDLE: &str = "files/avatar-1";

// ============================================================================
// Repositories
// ============================================================================

#[derive(Default)]
pub struct InMemoryUsers {
    rows: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUsers {
    pub fn count(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.rows.lock().get(&id).cloned()
    }

    pub fn insert(&self, user: User) {
        self.rows.lock().insert(user.id, user);
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn create(&self, user: &User) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        if rows
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::UniqueViolation("users_email_key".to_string()));
        }
        rows.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        if rows
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::UniqueViolation("users_email_key".to_string()));
        }
        match rows.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.rows.lock().remove(&id);
        Ok(())
    }

    async fn list(&self, offset: i64, limit: i64) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.rows.lock().values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(users
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryProfiles {
    rows: Mutex<HashMap<Uuid, Profile>>,
}

impl InMemoryProfiles {
    pub fn get(&self, user_id: Uuid) -> Option<Profile> {
        self.rows.lock().get(&user_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfiles {
    async fn create(&self, profile: &Profile) -> StoreResult<()> {
        self.rows.lock().insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.rows.lock().get(&user_id).cloned())
    }

    async fn update(&self, profile: &Profile) -> StoreResult<()> {
        self.rows.lock().insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> StoreResult<()> {
        self.rows.lock().remove(&user_id);
        Ok(())
    }
}

/// Link store with an optional gate that holds inserts until two callers arrive
#[derive(Default)]
pub struct InMemoryLinks {
    rows: Mutex<Vec<ProviderLink>>,
    insert_gate: Mutex<Option<Arc<Barrier>>>,
}

impl InMemoryLinks {
    pub fn gate_inserts(&self, parties: usize) {
        *self.insert_gate.lock() = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn all(&self) -> Vec<ProviderLink> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl ProviderLinkRepository for InMemoryLinks {
    async fn create(&self, link: &ProviderLink) -> StoreResult<()> {
        let gate = self.insert_gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }

        let mut rows = self.rows.lock();
        if rows.iter().any(|l| {
            l.provider_type == link.provider_type && l.provider_user_id == link.provider_user_id
        }) {
            return Err(StoreError::UniqueViolation(
                "provider_links_provider_identity_key".to_string(),
            ));
        }
        rows.push(link.clone());
        Ok(())
    }

    async fn find_by_provider(
        &self,
        provider_type: ProviderType,
        provider_user_id: &str,
    ) -> StoreResult<Option<ProviderLink>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|l| l.provider_type == provider_type && l.provider_user_id == provider_user_id)
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<ProviderLink>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|l| l.id != id);
        if rows.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ============================================================================
// Authorities
// ============================================================================

/// Verification authority that accepts [`VALID_CODE`] for every pending request
#[derive(Default)]
pub struct FakeVerification {
    registrations: Mutex<HashMap<String, PendingRegistration>>,
    email_changes: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl VerificationAuthority for FakeVerification {
    async fn start_registration(&self, email: &str, password: &str) -> Result<String> {
        let correlation = Uuid::new_v4().to_string();
        self.registrations.lock().insert(
            correlation.clone(),
            PendingRegistration {
                email: email.to_string(),
                password: password.to_string(),
            },
        );
        Ok(correlation)
    }

    async fn verify_registration(
        &self,
        correlation: &str,
        code: &str,
    ) -> Result<PendingRegistration> {
        if code != VALID_CODE {
            return Err(IdentityError::InvalidVerificationCode);
        }
        self.registrations
            .lock()
            .remove(correlation)
            .ok_or(IdentityError::InvalidVerificationCode)
    }

    async fn start_email_change(&self, _user_id: Uuid, email: &str) -> Result<String> {
        let correlation = Uuid::new_v4().to_string();
        self.email_changes
            .lock()
            .insert(correlation.clone(), email.to_string());
        Ok(correlation)
    }

    async fn verify_email_change(&self, correlation: &str, code: &str) -> Result<String> {
        if code != VALID_CODE {
            return Err(IdentityError::InvalidVerificationCode);
        }
        self.email_changes
            .lock()
            .remove(correlation)
            .ok_or(IdentityError::InvalidVerificationCode)
    }
}

#[derive(Default)]
pub struct FakeRoles {
    roles: Mutex<HashMap<Uuid, String>>,
    permissions: Mutex<HashMap<String, BTreeSet<String>>>,
    pub fail_assign: AtomicBool,
    pub fail_reads: AtomicBool,
    pub resolve_calls: AtomicUsize,
}

impl FakeRoles {
    pub fn grant(&self, role: &str, permission: &str) {
        self.permissions
            .lock()
            .entry(role.to_string())
            .or_default()
            .insert(permission.to_string());
    }

    pub fn role_of(&self, subject: Uuid) -> Option<String> {
        self.roles.lock().get(&subject).cloned()
    }

    pub fn set_role(&self, subject: Uuid, role: &str) {
        self.roles.lock().insert(subject, role.to_string());
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(IdentityError::RoleAuthority("unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleAuthority for FakeRoles {
    async fn resolve_role(&self, subject: Uuid) -> Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        self.role_of(subject)
            .ok_or_else(|| IdentityError::RoleAuthority("no role assigned".to_string()))
    }

    async fn list_permissions(&self, subject: Uuid) -> Result<BTreeSet<String>> {
        self.check_reads()?;
        let role = self.role_of(subject).unwrap_or_default();
        Ok(self
            .permissions
            .lock()
            .get(&role)
            .cloned()
            .unwrap_or_default())
    }

    async fn has_permission(&self, subject: Uuid, permission: &str) -> Result<bool> {
        Ok(self.list_permissions(subject).await?.contains(permission))
    }

    async fn has_role(&self, subject: Uuid, role: &str) -> Result<bool> {
        self.check_reads()?;
        Ok(self.role_of(subject).as_deref() == Some(role))
    }

    async fn assign_role(&self, subject: Uuid, role: &str) -> Result<()> {
        if self.fail_assign.load(Ordering::SeqCst) {
            return Err(IdentityError::RoleAuthority("assignment rejected".to_string()));
        }
        self.set_role(subject, role);
        Ok(())
    }
}

/// Avatar ingestor that either returns [`AVATAR_HANDLE`] or fails like a 500 from the host
#[derive(Default)]
pub struct FakeAvatars {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl AvatarIngestor for FakeAvatars {
    async fn ingest(
        &self,
        _trace_id: &str,
        _owner: Uuid,
        _remote_url: &str,
    ) -> std::result::Result<String, AvatarError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AvatarError::Status(500));
        }
        Ok(AVATAR_HANDLE.to_string())
    }
}

/// File store that keeps uploads in memory and hands out sequential handles
#[derive(Default)]
pub struct FakeFiles {
    uploads: Mutex<Vec<Upload>>,
    pub fail: AtomicBool,
}

impl FakeFiles {
    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl FileStore for FakeFiles {
    async fn upload(&self, upload: Upload) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IdentityError::FileStore("upload rejected: status 503".to_string()));
        }
        let mut uploads = self.uploads.lock();
        uploads.push(upload);
        Ok(format!("files/upload-{}", uploads.len()))
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<UserEvent>>,
    pub fail: AtomicBool,
}

impl RecordingEvents {
    pub fn types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(&self, event: &UserEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IdentityError::Internal("broker down".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub users: Arc<InMemoryUsers>,
    pub profiles: Arc<InMemoryProfiles>,
    pub links: Arc<InMemoryLinks>,
    pub verification: Arc<FakeVerification>,
    pub roles: Arc<FakeRoles>,
    pub avatars: Arc<FakeAvatars>,
    pub files: Arc<FakeFiles>,
    pub events: Arc<RecordingEvents>,
    pub signer: TokenSigner,
    pub identity: IdentityService,
    pub accounts: AccountService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(AuthPolicy::default())
    }

    pub fn with_policy(policy: AuthPolicy) -> Self {
        let users = Arc::new(InMemoryUsers::default());
        let profiles = Arc::new(InMemoryProfiles::default());
        let links = Arc::new(InMemoryLinks::default());
        let verification = Arc::new(FakeVerification::default());
        let roles = Arc::new(FakeRoles::default());
        let avatars = Arc::new(FakeAvatars::default());
        let files = Arc::new(FakeFiles::default());
        let events = Arc::new(RecordingEvents::default());

        let deps = Collaborators {
            users: users.clone(),
            profiles: profiles.clone(),
            links: links.clone(),
            verification: verification.clone(),
            roles: roles.clone(),
            avatars: avatars.clone(),
            files: files.clone(),
            events: events.clone(),
        };

        let signer = test_signer();
        let identity = IdentityService::new(deps.clone(), signer.clone(), policy.clone());
        let accounts = AccountService::new(deps, policy);

        Self {
            users,
            profiles,
            links,
            verification,
            roles,
            avatars,
            files,
            events,
            signer,
            identity,
            accounts,
        }
    }
}

pub fn test_signer() -> TokenSigner {
    TokenSigner::new(
        KeyMaterial::Hmac {
            secret: TEST_SECRET.to_string(),
        },
        TEST_ISSUER,
        TEST_AUDIENCE,
    )
    .expect("test signer")
}

/// Run both signup phases and return the outcome
pub async fn sign_up(h: &Harness, email: &str, password: &str) -> identity_service::services::AuthOutcome {
    let correlation = h
        .identity
        .start_signup(email, password)
        .await
        .expect("start signup");
    h.identity
        .verify_signup("trace-signup", &correlation, VALID_CODE)
        .await
        .expect("verify signup")
}

pub fn oauth_identity(provider_user_id: &str, email: &str) -> identity_service::models::OAuthIdentity {
    identity_service::models::OAuthIdentity {
        provider_type: ProviderType::Google,
        provider_user_id: provider_user_id.to_string(),
        email: email.to_string(),
        display_name: Some("Ada Lovelace".to_string()),
        avatar_url: Some("https://lh3.example.com/a/photo.jpg".to_string()),
    }
}
