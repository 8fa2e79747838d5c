/// Input validators module - protects against invalid account data and attacks
/// Features:
/// 1. DoS Protection: Input length limits
/// 2. Data Theft Protection: Input sanitization
/// 3. Phishing Protection: Email validation
/// 4. SQL Injection Prevention: Query validation

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_NAME_LENGTH: usize = 256;
const MIN_NAME_LENGTH: usize = 1;
const MAX_USERNAME_LENGTH: usize = 30;
const MIN_USERNAME_LENGTH: usize = 3;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();

    // Usernames are URL- and handle-safe: letters, digits, dot, underscore, dash
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").unwrap();

    // Regex to detect potentially malicious SQL patterns
    static ref SQL_INJECTION_PATTERNS: [Regex; 4] = [
        // Union-based SQL injection
        Regex::new(r"(?i)\s+UNION\s+").unwrap(),
        // Comment-based injection
        Regex::new(r"(--|/\*|\*/|xp_|sp_)").unwrap(),
        // Stacked queries
        Regex::new(r"(?i);\s*(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER)").unwrap(),
        // Time-based blind injection
        Regex::new(r"(?i)(SLEEP\s*\(|WAITFOR\s+DELAY|BENCHMARK\s*\()").unwrap(),
    ];
}

/// Validates an email address
/// - Checks format using RFC 5322 simplified regex
/// - Verifies length constraints
/// - Detects potential phishing patterns
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    if has_suspicious_email_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("email".to_string()));
    }

    if contains_sql_injection_patterns(trimmed) {
        return Err(ValidationError::PossibleSQLInjection);
    }

    Ok(trimmed.to_string())
}

/// Validates an account username and normalizes it to lowercase.
/// Usernames are stored lowercased so lookups are case-insensitive.
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }

    if trimmed.len() < MIN_USERNAME_LENGTH {
        return Err(ValidationError::TooShort(
            "username".to_string(),
            MIN_USERNAME_LENGTH,
        ));
    }

    if trimmed.len() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong(
            "username".to_string(),
            MAX_USERNAME_LENGTH,
        ));
    }

    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }

    Ok(trimmed.to_lowercase())
}

/// Validates a display name
/// - Checks length constraints
/// - Validates against control characters
/// - Detects SQL injection patterns
pub fn is_valid_full_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("full_name".to_string()));
    }

    if trimmed.len() < MIN_NAME_LENGTH {
        return Err(ValidationError::TooShort(
            "full_name".to_string(),
            MIN_NAME_LENGTH,
        ));
    }

    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong(
            "full_name".to_string(),
            MAX_NAME_LENGTH,
        ));
    }

    if has_suspicious_name_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("full_name".to_string()));
    }

    if contains_sql_injection_patterns(trimmed) {
        return Err(ValidationError::PossibleSQLInjection);
    }

    Ok(trimmed.to_string())
}

/// Detects suspicious patterns in email addresses that might indicate phishing
fn has_suspicious_email_patterns(email: &str) -> bool {
    // Extremely long local part (before @) is a phishing indicator
    if let Some(at_pos) = email.find('@') {
        let local_part = &email[..at_pos];
        if local_part.len() > 64 {
            return true;
        }
    }

    if email.matches('@').count() != 1 {
        return true;
    }

    if email.contains('\0') {
        return true;
    }

    false
}

/// Detects suspicious patterns in display names
fn has_suspicious_name_patterns(name: &str) -> bool {
    if name.contains('\0') {
        return true;
    }

    if name.chars().any(|c| c.is_control()) {
        return true;
    }

    // Excessive special characters hint at injection attempts
    let special_char_count = name
        .chars()
        .filter(|c| {
            !c.is_alphanumeric() && !c.is_whitespace() && *c != '-' && *c != '.' && *c != '_' && *c != '\''
        })
        .count();

    special_char_count > 5
}

fn contains_sql_injection_patterns(input: &str) -> bool {
    SQL_INJECTION_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(input))
}
