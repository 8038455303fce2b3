use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{IdentityError, Result};

/// Input validation utilities for identity service

// Compile regex patterns once at startup
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("hardcoded email regex is invalid - fix source code")
});

/// Validate email format (RFC 5322 simplified)
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Trim and lower-case an email, rejecting malformed input
pub fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    if !validate_email(&normalized) {
        return Err(IdentityError::InvalidEmail(email.trim().to_string()));
    }
    Ok(normalized)
}

/// Enforce the minimum password length, counted in characters
pub fn validate_password(password: &str, min_length: usize) -> Result<()> {
    if password.chars().count() < min_length {
        return Err(IdentityError::WeakPassword(format!(
            "must be at least {} characters",
            min_length
        )));
    }
    Ok(())
}

/// Accept only absolute http(s) URLs with a host
pub fn validate_remote_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|_| IdentityError::Validation("invalid URL".to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return Err(IdentityError::Validation("URL must use http or https".to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(IdentityError::Validation("URL must include a host".to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@sub.example.co.uk"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!validate_email(""));
        assert!(!validate_email("no-at-sign"));
        assert!(!validate_email("user@"));
        assert!(!validate_email("user@host"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(matches!(
            normalize_email("bogus"),
            Err(IdentityError::InvalidEmail(_))
        ));
    }

    #[test]
    fn test_password_length_boundary() {
        assert!(validate_password("12345678", 8).is_ok());
        assert!(matches!(
            validate_password("1234567", 8),
            Err(IdentityError::WeakPassword(_))
        ));
        // Multi-byte characters count once
        assert!(validate_password("пароль12", 8).is_ok());
    }

    #[test]
    fn test_remote_url() {
        assert!(validate_remote_url("https://cdn.example.com/a.png").is_ok());
        assert!(validate_remote_url("ftp://example.com/a.png").is_err());
        assert!(validate_remote_url("not a url").is_err());
        assert!(validate_remote_url("file:///etc/passwd").is_err());
    }
}
