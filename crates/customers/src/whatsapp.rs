//! `wa.me` click-to-chat links.

use kedai_core::DomainError;
use kedai_core::validate::normalize_my_phone;

/// Builds `https://wa.me/<digits>?text=<message>` for a Malaysian number.
///
/// The phone may be in any accepted local format; spaces in the message are
/// encoded as `%20`.
pub fn whatsapp_link(phone: &str, message: &str) -> Result<String, DomainError> {
    let e164 = normalize_my_phone(phone)?;
    let digits = e164.trim_start_matches('+');
    let text: String = url::form_urlencoded::byte_serialize(message.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    Ok(format!("https://wa.me/{digits}?text={text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_link_with_encoded_text() {
        let link = whatsapp_link("012-345 6789", "Invoice INV-000001: RM 10.00 & thanks!").unwrap();
        assert_eq!(
            link,
            "https://wa.me/60123456789?text=Invoice%20INV-000001%3A%20RM%2010.00%20%26%20thanks%21"
        );
    }

    #[test]
    fn keeps_literal_plus_signs() {
        let link = whatsapp_link("+60123456789", "1+1").unwrap();
        assert!(link.ends_with("text=1%2B1"));
    }

    #[test]
    fn rejects_foreign_numbers() {
        assert!(whatsapp_link("+6591234567", "hi").is_err());
    }
}
