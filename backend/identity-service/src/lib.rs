/// Identity Service Library
///
/// Resolves who a caller is and what they may do for the Nova backend.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: Repository traits and their Postgres implementations
/// - `error`: Error types
/// - `http`: axum router
/// - `models`: Data models
/// - `security`: Password hashing and token types
/// - `services`: Identity flows and authority clients
/// - `validators`: Input validation
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod security;
pub mod services;
pub mod validators;

// Re-export commonly used types
pub use error::{IdentityError, Result};
pub use http::{build_router, AppState};
