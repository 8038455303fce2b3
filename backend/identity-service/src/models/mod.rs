/// Data models for identity and authentication
pub mod oauth;
pub mod profile;
pub mod user;

pub use oauth::{OAuthIdentity, ProviderLink, ProviderType};
pub use profile::{Profile, ProfilePatch};
pub use user::{UsableStatuses, User, UserStatus};
