//! Configuration management for Identity Service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! # Example
//!
//! ```no_run
//! use identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use crypto_core::KeyMaterial;
use std::env;
use std::time::Duration;
use tracing::info;

use crate::models::UsableStatuses;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub kafka: KafkaSettings,
    pub jwt: JwtSettings,
    pub server: ServerSettings,
    pub authorities: AuthoritySettings,
    pub avatar: AvatarSettings,
    pub auth: AuthSettings,
}

impl Settings {
    /// Load settings from environment variables
    ///
    /// A `.env` file is honoured in debug builds only.
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) && dotenvy::dotenv().is_ok() {
            info!("Loaded .env file for development");
        }

        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            kafka: KafkaSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            server: ServerSettings::from_env()?,
            authorities: AuthoritySettings::from_env()?,
            avatar: AvatarSettings::from_env()?,
            auth: AuthSettings::from_env()?,
        })
    }
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            acquire_timeout: env::var("DATABASE_ACQUIRE_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid DATABASE_ACQUIRE_TIMEOUT")?,
        })
    }
}

/// Kafka event streaming settings
///
/// With no brokers configured, domain events are only logged.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub producer_timeout: u64,
}

impl KafkaSettings {
    fn from_env() -> Result<Self> {
        let brokers = env::var("KAFKA_BROKERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            brokers,
            topic: env::var("KAFKA_TOPIC").unwrap_or_else(|_| "identity.user-events".to_string()),
            producer_timeout: env::var("KAFKA_PRODUCER_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid KAFKA_PRODUCER_TIMEOUT")?,
        })
    }
}

/// Ten years
const MAX_TOKEN_TTL_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// JWT signing settings
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub keys: KeyMaterial,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        let secret = env::var("JWT_SECRET").ok();
        let private_pem = env::var("JWT_PRIVATE_KEY").ok();
        let public_pem = env::var("JWT_PUBLIC_KEY").ok();
        let keys = KeyMaterial::from_parts(
            secret.as_deref(),
            private_pem.as_deref(),
            public_pem.as_deref(),
        )
        .context("Invalid JWT key configuration")?;

        let access_ttl: u64 = env::var("JWT_ACCESS_TTL_SECONDS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .context("Invalid JWT_ACCESS_TTL_SECONDS")?;
        let refresh_ttl: u64 = env::var("JWT_REFRESH_TTL_SECONDS")
            .unwrap_or_else(|_| "2592000".to_string())
            .parse()
            .context("Invalid JWT_REFRESH_TTL_SECONDS")?;

        if access_ttl == 0 || access_ttl >= refresh_ttl {
            bail!("JWT_ACCESS_TTL_SECONDS must be positive and shorter than JWT_REFRESH_TTL_SECONDS");
        }
        if refresh_ttl > MAX_TOKEN_TTL_SECONDS {
            bail!("JWT_REFRESH_TTL_SECONDS must not exceed {MAX_TOKEN_TTL_SECONDS}");
        }

        Ok(Self {
            keys,
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "user-service".to_string()),
            audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "frontend".to_string()),
            access_ttl: Duration::from_secs(access_ttl),
            refresh_ttl: Duration::from_secs(refresh_ttl),
        })
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in `x-internal-api-key` on internal routes
    pub internal_api_key: Option<String>,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid SERVER_PORT")?,
            internal_api_key: env::var("INTERNAL_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }
}

/// Endpoints of the external verification, role and file authorities
#[derive(Debug, Clone)]
pub struct AuthoritySettings {
    pub verification_url: String,
    pub role_url: String,
    pub file_store_url: String,
    pub request_timeout: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_elapsed: Duration,
    pub role_cache_ttl: Duration,
}

impl AuthoritySettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            verification_url: env::var("VERIFICATION_AUTHORITY_URL")
                .context("VERIFICATION_AUTHORITY_URL must be set")?,
            role_url: env::var("ROLE_AUTHORITY_URL").context("ROLE_AUTHORITY_URL must be set")?,
            file_store_url: env::var("FILE_STORE_URL").context("FILE_STORE_URL must be set")?,
            request_timeout: Duration::from_millis(
                env::var("AUTHORITY_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .context("Invalid AUTHORITY_TIMEOUT_MS")?,
            ),
            retry_initial_backoff: Duration::from_millis(
                env::var("AUTHORITY_RETRY_INITIAL_MS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .context("Invalid AUTHORITY_RETRY_INITIAL_MS")?,
            ),
            retry_max_elapsed: Duration::from_millis(
                env::var("AUTHORITY_RETRY_MAX_ELAPSED_MS")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .context("Invalid AUTHORITY_RETRY_MAX_ELAPSED_MS")?,
            ),
            role_cache_ttl: Duration::from_secs(
                env::var("ROLE_CACHE_TTL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("Invalid ROLE_CACHE_TTL_SECONDS")?,
            ),
        })
    }
}

/// Remote avatar fetch limits
#[derive(Debug, Clone)]
pub struct AvatarSettings {
    pub max_bytes: usize,
    pub timeout: Duration,
}

impl AvatarSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            max_bytes: env::var("AVATAR_MAX_BYTES")
                .unwrap_or_else(|_| (5 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid AVATAR_MAX_BYTES")?,
            timeout: Duration::from_millis(
                env::var("AVATAR_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .context("Invalid AVATAR_TIMEOUT_MS")?,
            ),
        })
    }
}

/// Authentication policy knobs
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub min_password_length: usize,
    pub default_role: String,
    pub usable_statuses: UsableStatuses,
}

impl AuthSettings {
    fn from_env() -> Result<Self> {
        let usable_statuses = env::var("AUTH_USABLE_STATUSES")
            .unwrap_or_else(|_| "active_or_new".to_string())
            .parse()
            .context("Invalid AUTH_USABLE_STATUSES")?;

        let min_password_length: usize = env::var("AUTH_MIN_PASSWORD_LENGTH")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .context("Invalid AUTH_MIN_PASSWORD_LENGTH")?;
        if min_password_length == 0 {
            bail!("AUTH_MIN_PASSWORD_LENGTH must be at least 1");
        }

        Ok(Self {
            min_password_length,
            default_role: env::var("AUTH_DEFAULT_ROLE").unwrap_or_else(|_| "user".to_string()),
            usable_statuses,
        })
    }
}
