//! Boundary validation for auth forms.

use regex::Regex;
use std::sync::LazyLock;

pub(crate) const DEFAULT_COUNTRY_CODE: &str = "+977";
const MIN_PASSWORD_LEN: usize = 8;

// Both patterns are literals; `None` only if the regex engine rejects them.
static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
static PATIENT_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9-]{0,31}$").ok());

pub(crate) use crate::identity::normalize_email;

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Uppercase and check a caller-supplied patient id.
pub(crate) fn normalize_patient_id(patient_id: &str) -> Result<String, &'static str> {
    let normalized = patient_id.trim().to_uppercase();
    if normalized.is_empty() {
        return Err("Patient ID is required.");
    }
    let valid = PATIENT_ID_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(&normalized));
    if valid {
        Ok(normalized)
    } else {
        Err("Patient ID may only contain letters, digits and dashes.")
    }
}

pub(crate) fn validate_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err("Full name is required.")
    } else {
        Ok(trimmed.to_string())
    }
}

pub(crate) fn validate_new_password(password: &str, confirm: &str) -> Result<(), &'static str> {
    if password.is_empty() {
        Err("Password is required.")
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        Err("Password must be at least 8 characters.")
    } else if confirm.is_empty() {
        Err("Please confirm your password.")
    } else if password != confirm {
        Err("Passwords do not match.")
    } else {
        Ok(())
    }
}

/// Validate an optional phone number and format it as `"<country_code> <phone>"`.
///
/// Nepal (`+977`) numbers must be exactly 10 digits starting with 97 or 98;
/// everything else needs at least 10 digits.
pub(crate) fn normalize_phone(
    country_code: Option<&str>,
    phone: Option<&str>,
) -> Result<Option<String>, &'static str> {
    let Some(phone) = phone.map(str::trim).filter(|phone| !phone.is_empty()) else {
        return Ok(None);
    };
    let country_code = country_code
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .unwrap_or(DEFAULT_COUNTRY_CODE);

    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if country_code == DEFAULT_COUNTRY_CODE {
        if digits.len() != 10 || !(digits.starts_with("97") || digits.starts_with("98")) {
            return Err("Please enter a valid number.");
        }
    } else if digits.len() < 10 {
        return Err("Please enter a valid phone number (at least 10 digits).");
    }

    Ok(Some(format!("{country_code} {phone}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Patient@Example.COM "), "patient@example.com");
    }

    #[test]
    fn patterns_compile() {
        assert!(EMAIL_RE.is_some());
        assert!(PATIENT_ID_RE.is_some());
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("patient@example.com"));
        assert!(valid_email("first.last+tag@clinic.example.org"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("patient"));
        assert!(!valid_email("patient@"));
        assert!(!valid_email("patient@example"));
        assert!(!valid_email("pa tient@example.com"));
    }

    #[test]
    fn patient_ids_are_uppercased() {
        assert_eq!(normalize_patient_id(" p0007 "), Ok("P0007".to_string()));
        assert_eq!(normalize_patient_id("ward-3"), Ok("WARD-3".to_string()));
        assert!(normalize_patient_id("").is_err());
        assert!(normalize_patient_id("P 0007").is_err());
        assert!(normalize_patient_id("-P1").is_err());
    }

    #[test]
    fn password_rules() {
        assert_eq!(validate_new_password("", ""), Err("Password is required."));
        assert_eq!(
            validate_new_password("short", "short"),
            Err("Password must be at least 8 characters.")
        );
        assert_eq!(
            validate_new_password("long-enough", ""),
            Err("Please confirm your password.")
        );
        assert_eq!(
            validate_new_password("long-enough", "long-enougH"),
            Err("Passwords do not match.")
        );
        assert_eq!(validate_new_password("long-enough", "long-enough"), Ok(()));
    }

    #[test]
    fn nepal_phone_rules() {
        assert_eq!(
            normalize_phone(Some("+977"), Some("9812345678")),
            Ok(Some("+977 9812345678".to_string()))
        );
        assert_eq!(
            normalize_phone(None, Some("970-123-4567")),
            Ok(Some("+977 970-123-4567".to_string()))
        );
        assert!(normalize_phone(Some("+977"), Some("9912345678")).is_err());
        assert!(normalize_phone(Some("+977"), Some("98123456789")).is_err());
    }

    #[test]
    fn other_country_phone_rules() {
        assert_eq!(
            normalize_phone(Some("+1"), Some("(555) 123-4567")),
            Ok(Some("+1 (555) 123-4567".to_string()))
        );
        assert!(normalize_phone(Some("+44"), Some("12345")).is_err());
    }

    #[test]
    fn phone_is_optional() {
        assert_eq!(normalize_phone(Some("+977"), None), Ok(None));
        assert_eq!(normalize_phone(Some("+977"), Some("   ")), Ok(None));
    }

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validate_name("  Asha  "), Ok("Asha".to_string()));
        assert!(validate_name("   ").is_err());
    }
}
