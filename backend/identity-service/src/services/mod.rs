/// Service layer for identity-service
///
/// - Identity resolution (signup, sign-in, OAuth linking, email change)
/// - Account self-service and administration
/// - Clients for the verification, role and file authorities
/// - Avatar ingestion and user lifecycle events
pub mod account;
pub mod authority;
pub mod avatar;
pub mod file_store;
pub mod identity;
pub mod kafka_events;
pub mod role_authority;
pub mod role_cache;
pub mod verification;

pub use account::{AccountService, AccountView, AvatarUpload, LinkedIdentity};
pub use avatar::{AvatarError, AvatarIngestor, HttpAvatarIngestor};
pub use file_store::{FileStore, HttpFileStore, Upload};
pub use identity::{AuthOutcome, AuthPolicy, Collaborators, IdentityService};
pub use kafka_events::{EventPublisher, KafkaEventProducer, LogEventPublisher, UserEvent};
pub use role_authority::{HttpRoleAuthority, RoleAuthority};
pub use role_cache::{CachingRoleAuthority, Clock, ManualClock, SystemClock};
pub use verification::{HttpVerificationAuthority, PendingRegistration, VerificationAuthority};
