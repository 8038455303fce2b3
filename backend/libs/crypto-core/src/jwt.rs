/// Shared JWT signing and validation module for Nova services
///
/// Tokens are signed with exactly one of two key modes, chosen when the signer is built:
///
/// - **HS256**: a shared secret, for deployments where signer and verifiers share one secret
/// - **RS256**: an RSA key pair in PEM format, for deployments that distribute only the public key
///
/// Keys are parsed eagerly by [`TokenSigner::new`]. Structurally invalid key material is rejected at
/// construction and never surfaces at issuance time.
///
/// ## Usage
///
/// ```rust,no_run
/// use crypto_core::jwt::{KeyMaterial, TokenSigner};
/// use std::time::Duration;
///
/// let keys = KeyMaterial::from_parts(Some("secret"), None, None)?;
/// let signer = TokenSigner::new(keys, "user-service", "frontend")?;
///
/// let mut extra = serde_json::Map::new();
/// extra.insert("role".into(), "user".into());
/// let access = signer.issue_access_token("7d7f0c9e", &extra, Duration::from_secs(3600))?;
///
/// let claims = signer.verifier().validate_access(&access)?;
/// assert_eq!(claims.role(), Some("user"));
/// # Ok::<(), anyhow::Error>(())
/// ```
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Marker value of the `typ` claim carried by refresh tokens
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Claims owned by the signer; caller-supplied extras can never replace them
pub const RESERVED_CLAIMS: [&str; 8] = ["sub", "iss", "aud", "iat", "exp", "nbf", "jti", "typ"];

// ============================================================================
// Data Structures
// ============================================================================

/// Decoded JWT claims: the standard claims plus whatever extras the issuer attached
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Present only on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn is_refresh(&self) -> bool {
        self.typ.as_deref() == Some(REFRESH_TOKEN_TYPE)
    }

    pub fn role(&self) -> Option<&str> {
        self.extra.get("role").and_then(Value::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.extra.get("email").and_then(Value::as_str)
    }
}

/// Token pair response structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl TokenPair {
    pub fn bearer(access_token: String, refresh_token: String, access_ttl: Duration) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: i64::try_from(access_ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }
}

// ============================================================================
// Key Material
// ============================================================================

/// Raw signing material, before parsing
#[derive(Clone)]
pub enum KeyMaterial {
    Hmac { secret: String },
    Rsa { private_pem: String, public_pem: String },
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Hmac { .. } => f.write_str("KeyMaterial::Hmac(<redacted>)"),
            KeyMaterial::Rsa { .. } => f.write_str("KeyMaterial::Rsa(<redacted>)"),
        }
    }
}

impl KeyMaterial {
    /// Pick the signing mode from optional configuration values
    ///
    /// Blank values count as absent. Exactly one mode must be configured.
    pub fn from_parts(
        secret: Option<&str>,
        private_pem: Option<&str>,
        public_pem: Option<&str>,
    ) -> Result<Self> {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|s| !s.is_empty())
        }

        match (present(secret), present(private_pem), present(public_pem)) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                bail!("JWT secret and RSA key pair are both configured; choose one signing mode")
            }
            (Some(secret), None, None) => Ok(KeyMaterial::Hmac {
                secret: secret.to_string(),
            }),
            (None, Some(private_pem), Some(public_pem)) => Ok(KeyMaterial::Rsa {
                private_pem: private_pem.to_string(),
                public_pem: public_pem.to_string(),
            }),
            (None, Some(_), None) | (None, None, Some(_)) => {
                bail!("RSA signing requires both a private and a public key")
            }
            (None, None, None) => bail!("no JWT signing key configured"),
        }
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            KeyMaterial::Hmac { .. } => Algorithm::HS256,
            KeyMaterial::Rsa { .. } => Algorithm::RS256,
        }
    }

    fn parse(&self) -> Result<(EncodingKey, DecodingKey)> {
        match self {
            KeyMaterial::Hmac { secret } => Ok((
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            )),
            KeyMaterial::Rsa {
                private_pem,
                public_pem,
            } => {
                let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                    .map_err(|e| anyhow!("Failed to parse RSA private key: {e}"))?;
                let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                    .map_err(|e| anyhow!("Failed to parse RSA public key: {e}"))?;
                Ok((encoding, decoding))
            }
        }
    }
}

// ============================================================================
// Token Generation
// ============================================================================

/// Issues access and refresh tokens for one issuer/audience pair
#[derive(Clone)]
pub struct TokenSigner {
    algorithm: Algorithm,
    encoding_key: Arc<EncodingKey>,
    verifier: TokenVerifier,
    issuer: String,
    audience: String,
}

impl TokenSigner {
    pub fn new(keys: KeyMaterial, issuer: &str, audience: &str) -> Result<Self> {
        if issuer.trim().is_empty() || audience.trim().is_empty() {
            bail!("JWT issuer and audience must not be empty");
        }

        let algorithm = keys.algorithm();
        let (encoding_key, decoding_key) = keys.parse()?;

        Ok(Self {
            algorithm,
            encoding_key: Arc::new(encoding_key),
            verifier: TokenVerifier {
                algorithm,
                decoding_key: Arc::new(decoding_key),
                issuer: issuer.to_string(),
                audience: audience.to_string(),
            },
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verifier bound to the same key material and issuer/audience constraints
    pub fn verifier(&self) -> TokenVerifier {
        self.verifier.clone()
    }

    /// Generate an access token
    ///
    /// `extra` is merged under the standard claims; any reserved claim in it is dropped.
    pub fn issue_access_token(
        &self,
        subject: &str,
        extra: &Map<String, Value>,
        ttl: Duration,
    ) -> Result<String> {
        let mut claims: Map<String, Value> = extra
            .iter()
            .filter(|(key, _)| !RESERVED_CLAIMS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        self.insert_standard_claims(&mut claims, subject, ttl)?;
        self.sign(&claims)
            .map_err(|e| anyhow!("Failed to generate access token: {e}"))
    }

    /// Generate a refresh token carrying the `typ=refresh` marker
    pub fn issue_refresh_token(&self, subject: &str, ttl: Duration) -> Result<String> {
        let mut claims = Map::new();
        self.insert_standard_claims(&mut claims, subject, ttl)?;
        claims.insert("typ".into(), Value::from(REFRESH_TOKEN_TYPE));

        self.sign(&claims)
            .map_err(|e| anyhow!("Failed to generate refresh token: {e}"))
    }

    fn insert_standard_claims(
        &self,
        claims: &mut Map<String, Value>,
        subject: &str,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| anyhow!("Token lifetime of {}s is out of range", ttl.as_secs()))?;

        claims.insert("sub".into(), Value::from(subject));
        claims.insert("iss".into(), Value::from(self.issuer.as_str()));
        claims.insert("aud".into(), Value::from(self.audience.as_str()));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(exp));
        Ok(())
    }

    fn sign(&self, claims: &Map<String, Value>) -> jsonwebtoken::errors::Result<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
    }
}

// ============================================================================
// Token Validation
// ============================================================================

/// Validates tokens issued by a [`TokenSigner`] with the same key material
///
/// Checks the signature, pins the algorithm (no algorithm confusion), and requires the
/// configured issuer and audience and an unexpired `exp`.
#[derive(Clone)]
pub struct TokenVerifier {
    algorithm: Algorithm,
    decoding_key: Arc<DecodingKey>,
    issuer: String,
    audience: String,
}

impl TokenVerifier {
    pub fn new(keys: &KeyMaterial, issuer: &str, audience: &str) -> Result<Self> {
        let (_, decoding_key) = keys.parse()?;
        Ok(Self {
            algorithm: keys.algorithm(),
            decoding_key: Arc::new(decoding_key),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        })
    }

    /// Validate any token from this issuer, access or refresh
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow::Error::new(e).context("Token validation failed"))
    }

    /// Validate an access token; refresh tokens are rejected
    pub fn validate_access(&self, token: &str) -> Result<Claims> {
        let claims = self.validate(token)?;
        if claims.is_refresh() {
            bail!("Token validation failed: refresh token presented as access token");
        }
        Ok(claims)
    }

    /// Validate a refresh token; anything without the refresh marker is rejected
    pub fn validate_refresh(&self, token: &str) -> Result<Claims> {
        let claims = self.validate(token)?;
        if !claims.is_refresh() {
            bail!("Token validation failed: not a refresh token");
        }
        Ok(claims)
    }
}

/// Returns true when a validation error was caused by expiry rather than a bad token
pub fn is_expired_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<jsonwebtoken::errors::Error>()
        .map(|e| matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature))
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
