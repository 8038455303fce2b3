/// Token signing and validation shared by Nova services
pub mod jwt;

pub use jwt::{Claims, KeyMaterial, TokenPair, TokenSigner, TokenVerifier};
