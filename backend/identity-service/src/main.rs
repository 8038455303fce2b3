/// Identity Service Main Entry Point
///
/// Starts the HTTP server with:
/// - PostgreSQL connection pool and migrations
/// - Verification, role and file authority clients
/// - Kafka event producer (optional)
use anyhow::{Context, Result};
use identity_service::{
    config::Settings,
    db::{PgProfileRepository, PgProviderLinkRepository, PgUserRepository},
    http::{start_http_server, AppState},
    security::TokenSigner,
    services::{
        AccountService, AuthPolicy, CachingRoleAuthority, Collaborators, EventPublisher,
        HttpAvatarIngestor, HttpFileStore, HttpRoleAuthority, HttpVerificationAuthority,
        IdentityService, KafkaEventProducer, LogEventPublisher,
    },
};
use resilience::RetryConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("identity_service=info,info")),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Identity Service");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let signer = TokenSigner::new(
        settings.jwt.keys.clone(),
        &settings.jwt.issuer,
        &settings.jwt.audience,
    )
    .context("Failed to initialize JWT keys")?;
    info!(algorithm = ?signer.algorithm(), "JWT keys initialized");

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    // Run database migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let authorities = &settings.authorities;
    let retry = RetryConfig {
        initial_backoff: authorities.retry_initial_backoff,
        max_elapsed: authorities.retry_max_elapsed,
        ..RetryConfig::default()
    };

    let verification = HttpVerificationAuthority::new(
        &authorities.verification_url,
        authorities.request_timeout,
        retry.clone(),
    )
    .context("Failed to build verification authority client")?;

    let role_client =
        HttpRoleAuthority::new(&authorities.role_url, authorities.request_timeout, retry)
            .context("Failed to build role authority client")?;
    let roles = CachingRoleAuthority::new(Arc::new(role_client), authorities.role_cache_ttl);
    info!(ttl_secs = authorities.role_cache_ttl.as_secs(), "Role cache enabled");

    let file_store = Arc::new(
        HttpFileStore::new(&authorities.file_store_url, authorities.request_timeout)
            .context("Failed to build file store client")?,
    );
    let avatars = HttpAvatarIngestor::new(
        file_store.clone(),
        settings.avatar.timeout,
        settings.avatar.max_bytes,
    )
    .context("Failed to build avatar ingestor")?;

    // Initialize Kafka producer (optional)
    let events: Arc<dyn EventPublisher> = if settings.kafka.brokers.is_empty() {
        info!("Kafka brokers not configured; logging events instead");
        Arc::new(LogEventPublisher)
    } else {
        let brokers = settings.kafka.brokers.join(",");
        match KafkaEventProducer::new(
            &brokers,
            &settings.kafka.topic,
            Duration::from_secs(settings.kafka.producer_timeout),
        ) {
            Ok(producer) => {
                info!("Kafka producer initialized");
                Arc::new(producer)
            }
            Err(err) => {
                error!("Failed to initialize Kafka producer: {:?}", err);
                Arc::new(LogEventPublisher)
            }
        }
    };

    let deps = Collaborators {
        users: Arc::new(PgUserRepository::new(db_pool.clone())),
        profiles: Arc::new(PgProfileRepository::new(db_pool.clone())),
        links: Arc::new(PgProviderLinkRepository::new(db_pool)),
        verification: Arc::new(verification),
        roles: Arc::new(roles),
        avatars: Arc::new(avatars),
        files: file_store,
        events,
    };

    let policy = AuthPolicy {
        min_password_length: settings.auth.min_password_length,
        default_role: settings.auth.default_role.clone(),
        usable_statuses: settings.auth.usable_statuses,
        access_ttl: settings.jwt.access_ttl,
        refresh_ttl: settings.jwt.refresh_ttl,
    };

    let state = AppState {
        verifier: signer.verifier(),
        identity: IdentityService::new(deps.clone(), signer, policy.clone()),
        accounts: AccountService::new(deps, policy),
        internal_api_key: settings.server.internal_api_key.clone(),
    };

    start_http_server(
        state,
        &settings.server.host,
        settings.server.port,
        shutdown_signal(),
    )
    .await
    .context("HTTP server error")?;

    info!("Identity service shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
