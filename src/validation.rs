//! Input checks shared by the account and link services.

use url::Url;

use crate::error::{ServiceError, ServiceResult};

const MAX_EMAIL_LEN: usize = 254;
const MAX_PASSWORD_LEN: usize = 1024;
const MAX_URL_LEN: usize = 2048;

/// Canonical form used for storage and lookup: trimmed and lower-cased.
pub fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate and canonicalize an email address.
pub fn normalize_email(email: &str) -> ServiceResult<String> {
    let email = canonical_email(email);

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(ServiceError::validation("email must be 1-254 characters"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(ServiceError::validation("email must not contain whitespace"));
    }

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return Err(ServiceError::validation("email must contain a single '@'")),
    };

    if local.is_empty() {
        return Err(ServiceError::validation("email is missing the local part"));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(ServiceError::validation("email domain is malformed"));
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> ServiceResult<()> {
    if password.is_empty() {
        return Err(ServiceError::validation("password must not be empty"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ServiceError::validation("password is too long"));
    }
    Ok(())
}

/// Accept absolute http(s) URLs with a host.
pub fn validate_target_url(target_url: &str) -> ServiceResult<()> {
    if target_url.is_empty() {
        return Err(ServiceError::validation("URL cannot be empty"));
    }
    if target_url.len() > MAX_URL_LEN {
        return Err(ServiceError::validation("URL is too long"));
    }

    let parsed = Url::parse(target_url)
        .map_err(|e| ServiceError::validation(format!("URL is malformed: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::validation("URL scheme must be http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ServiceError::validation("URL must have a host"));
    }
    Ok(())
}

/// Short codes are 1..=max_len characters of `[A-Za-z0-9_-]`.
pub fn validate_short_code(short_code: &str, max_len: usize) -> ServiceResult<()> {
    if short_code.is_empty() || short_code.chars().count() > max_len {
        return Err(ServiceError::validation(format!(
            "short code must be 1-{max_len} characters"
        )));
    }
    if !short_code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ServiceError::validation(
            "short code may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}
