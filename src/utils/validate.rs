// src/utils/validate.rs

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;
use validator::ValidationError;

static CONTACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\d{10,15}$").expect("static regex"));

static RESET_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("static regex"));

/// Drops the separators people type into phone numbers.
pub fn normalize_contact(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

pub fn validate_contact(value: &str) -> Result<(), ValidationError> {
    if CONTACT_RE.is_match(&normalize_contact(value)) {
        return Ok(());
    }
    Err(ValidationError::new("contact")
        .with_message(Cow::from("Please enter a valid contact number (10-15 digits)")))
}

pub fn validate_image_url(value: &str) -> Result<(), ValidationError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ValidationError::new("image").with_message(Cow::from("Image must be a valid URL"))),
    }
}

/// Raw reset tokens are 32 random bytes rendered as lowercase hex.
pub fn is_reset_token(value: &str) -> bool {
    RESET_TOKEN_RE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_accepts_separators_and_plus() {
        assert!(validate_contact("+1 (555) 010-9999").is_ok());
        assert!(validate_contact("9876543210").is_ok());
        assert!(validate_contact("12345").is_err());
        assert!(validate_contact("call me").is_err());
    }

    #[test]
    fn reset_token_shape() {
        assert!(is_reset_token(&"ab".repeat(32)));
        assert!(!is_reset_token(&"AB".repeat(32)));
        assert!(!is_reset_token("abc"));
    }

    #[test]
    fn image_must_be_http_url() {
        assert!(validate_image_url("https://cdn.example.com/a.png").is_ok());
        assert!(validate_image_url("javascript:alert(1)").is_err());
        assert!(validate_image_url("not a url").is_err());
    }
}
