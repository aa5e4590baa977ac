//! Field validators shared by the company, customer, user and product models.

use crate::error::{DomainError, DomainResult};

/// TIN used on e-invoices issued to buyers without their own TIN.
pub const GENERAL_PUBLIC_TIN: &str = "EI00000000010";

/// Trims `value` and fails when nothing is left.
pub fn required(field: &str, value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Trims an optional value; blank strings become `None`.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalises a Malaysian phone number to E.164 (`+60...`).
///
/// Accepts `+60`, `60` or trunk `0` prefixes with spaces, dashes, dots and
/// parentheses as separators. Mobile numbers (`1x`) carry 9 digits after the
/// prefix, or 10 for the `11` range. Landlines (`3`..`9`) carry 8 or 9.
pub fn normalize_my_phone(raw: &str) -> DomainResult<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let national = if let Some(rest) = compact.strip_prefix("+60") {
        rest
    } else if let Some(rest) = compact.strip_prefix("60") {
        rest
    } else if let Some(rest) = compact.strip_prefix('0') {
        rest
    } else {
        return Err(DomainError::validation(format!(
            "phone number must start with +60, 60 or 0: {raw}"
        )));
    };

    if national.is_empty() || !national.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::validation(format!("phone number must be numeric: {raw}")));
    }

    let len = national.len();
    let valid = match national.as_bytes()[0] {
        b'1' if national.starts_with("11") => len == 10,
        b'1' => len == 9,
        b'3'..=b'9' => len == 8 || len == 9,
        _ => false,
    };
    if !valid {
        return Err(DomainError::validation(format!("not a Malaysian phone number: {raw}")));
    }

    Ok(format!("+60{national}"))
}

/// Minimal structural check: one `@`, non-empty local part, dotted domain.
pub fn validate_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation(format!("invalid email: {raw}")));
    };
    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || !domain_ok || domain.contains('@') || email.contains(char::is_whitespace) {
        return Err(DomainError::validation(format!("invalid email: {raw}")));
    }
    Ok(email)
}

/// LHDN tax identification number: 11-14 characters, one or two leading
/// letters, digits after that.
pub fn validate_tin(raw: &str) -> DomainResult<String> {
    let tin = raw.trim().to_ascii_uppercase();
    let letters = tin.bytes().take_while(|b| b.is_ascii_uppercase()).count();
    let digits_ok = tin.bytes().skip(letters).all(|b| b.is_ascii_digit());
    if !(11..=14).contains(&tin.len()) || !(1..=2).contains(&letters) || !digits_ok {
        return Err(DomainError::validation(format!("invalid TIN: {raw}")));
    }
    Ok(tin)
}

/// MSIC industry code: exactly five digits.
pub fn is_msic_code(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Malaysian postcode: exactly five digits.
pub fn is_postcode(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_mobile_formats() {
        for raw in ["012-345 6789", "+60 12-345 6789", "60123456789", "(012) 345.6789"] {
            assert_eq!(normalize_my_phone(raw).unwrap(), "+60123456789", "{raw}");
        }
        assert_eq!(normalize_my_phone("011-2345 6789").unwrap(), "+601123456789");
    }

    #[test]
    fn accepts_landlines() {
        assert_eq!(normalize_my_phone("03-2141 2345").unwrap(), "+60321412345");
        assert_eq!(normalize_my_phone("082-123456").unwrap(), "+6082123456");
    }

    #[test]
    fn rejects_bad_phones() {
        for raw in ["", "12345", "+65 9123 4567", "012-345", "011-234 567", "02-1234 5678", "01a-3456789"] {
            assert!(normalize_my_phone(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn email_is_lowercased() {
        assert_eq!(validate_email(" Aisyah@Kedai.MY ").unwrap(), "aisyah@kedai.my");
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("@kedai.my").is_err());
        assert!(validate_email("a@@kedai.my").is_err());
    }

    #[test]
    fn tin_shapes() {
        assert_eq!(validate_tin("c20880050010").unwrap(), "C20880050010");
        assert!(validate_tin(GENERAL_PUBLIC_TIN).is_ok());
        assert!(validate_tin("IG1234567890").is_ok());
        assert!(validate_tin("12345678901").is_err());
        assert!(validate_tin("C2088").is_err());
        assert!(validate_tin("ABC12345678").is_err());
        assert!(validate_tin("C208800X0010").is_err());
    }

    #[test]
    fn required_trims() {
        assert_eq!(required("name", "  Kedai Runcit ").unwrap(), "Kedai Runcit");
        assert!(required("name", "   ").is_err());
        assert_eq!(optional(Some("  ")), None);
    }

    #[test]
    fn code_shapes() {
        assert!(is_msic_code("47111"));
        assert!(!is_msic_code("4711"));
        assert!(is_postcode("50450"));
        assert!(!is_postcode("5045A"));
    }
}
