/// Password Hashing and Verification
///
/// Handles password hashing with bcrypt and password strength validation.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{AppError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Hash a password using bcrypt
///
/// Strength rules are enforced here so that no weak password can reach the
/// database through any code path.
///
/// # Errors
/// Returns error if the password fails validation or bcrypt hashing fails
pub fn hash_password(password: &str) -> Result<String, AppError> {
    validate_password_strength(password)?;

    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its stored hash
///
/// # Errors
/// Returns error if the hash is malformed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Validate password strength requirements
///
/// Requirements:
/// - 8 to 128 characters
/// - At least one digit
/// - At least one lowercase letter
/// - At least one uppercase letter
pub fn validate_password_strength(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        )));
    }

    // bcrypt limitation and DoS prevention
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        )));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(AppError::Validation(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password).expect("Failed to hash password");

        assert_ne!(password, hash);
        // bcrypt identifier
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_verify_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password).expect("Failed to hash password");

        let is_valid = verify_password(password, &hash).expect("Failed to verify password");
        assert!(is_valid);
    }

    #[test]
    fn test_verify_wrong_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password).expect("Failed to hash password");

        let is_valid =
            verify_password("WrongPassword123", &hash).expect("Failed to verify password");
        assert!(!is_valid);
    }

    #[test]
    fn test_verify_against_malformed_hash() {
        assert!(verify_password("ValidPassword123", "not-a-bcrypt-hash").is_err());
    }

    #[test]
    fn test_too_short_password() {
        assert!(hash_password("Short1").is_err());
    }

    #[test]
    fn test_too_long_password() {
        let long_password = "a".repeat(MAX_PASSWORD_LENGTH + 1) + "A1";
        assert!(hash_password(&long_password).is_err());
    }

    #[test]
    fn test_missing_character_classes() {
        assert!(hash_password("NoDigitsPassword").is_err());
        assert!(hash_password("NOLOWERCASE1").is_err());
        assert!(hash_password("nouppercase1").is_err());
    }

    #[test]
    fn test_valid_password() {
        assert!(hash_password("ValidPassword123").is_ok());
    }
}
