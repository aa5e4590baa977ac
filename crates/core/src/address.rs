use serde::{Deserialize, Serialize};

/// Postal address as required on Malaysian e-invoices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub postcode: String,
    /// State name or code, e.g. "Selangor".
    pub state: String,
    /// ISO 3166-1 alpha-3.
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "MYS".to_string()
}

impl Address {
    /// Trimmed copy with an upper-cased country code.
    pub fn normalized(&self) -> Self {
        Self {
            line1: self.line1.trim().to_string(),
            line2: self
                .line2
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            city: self.city.trim().to_string(),
            postcode: self.postcode.trim().to_string(),
            state: self.state.trim().to_string(),
            country: match self.country.trim() {
                "" => default_country(),
                c => c.to_ascii_uppercase(),
            },
        }
    }

    /// Single-line rendering for CSV and messages.
    pub fn one_line(&self) -> String {
        [
            Some(self.line1.as_str()),
            self.line2.as_deref(),
            Some(self.postcode.as_str()),
            Some(self.city.as_str()),
            Some(self.state.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_fills_country_and_drops_blank_line2() {
        let address = Address {
            line1: " 12 Jalan Ampang ".into(),
            line2: Some("  ".into()),
            city: "Kuala Lumpur".into(),
            postcode: "50450".into(),
            state: "W.P. Kuala Lumpur".into(),
            country: String::new(),
        }
        .normalized();

        assert_eq!(address.line1, "12 Jalan Ampang");
        assert_eq!(address.line2, None);
        assert_eq!(address.country, "MYS");
        assert_eq!(
            address.one_line(),
            "12 Jalan Ampang, 50450, Kuala Lumpur, W.P. Kuala Lumpur"
        );
    }
}
