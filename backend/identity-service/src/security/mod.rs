/// Security module for authentication
///
/// - **crypto-core::jwt**: Shared JWT signer and verifier (HS256 or RS256)
/// - **password**: Argon2id password hashing
pub use crypto_core::jwt::{Claims, KeyMaterial, TokenPair, TokenSigner, TokenVerifier};

pub mod password;

pub use password::{hash_password, verify_against_dummy, verify_password};
