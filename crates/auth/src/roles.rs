use serde::{Deserialize, Serialize};

use crate::Permission;

/// Staff role within one company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Cashier,
    Accountant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Cashier => "cashier",
            Role::Accountant => "accountant",
        }
    }

    /// Owners and admins manage staff accounts.
    pub fn manages_users(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "cashier" => Ok(Role::Cashier),
            "accountant" => Ok(Role::Accountant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

const CASHIER: &[&str] = &[
    "company.read",
    "customers.read",
    "customers.write",
    "products.read",
    "invoices.read",
    "receipts.*",
    "pos.*",
];

const ACCOUNTANT: &[&str] = &[
    "company.read",
    "customers.*",
    "products.read",
    "invoices.*",
    "payments.write",
    "receipts.read",
    "ledger.*",
    "dashboard.read",
    "einvoice.*",
    "audit.read",
];

/// Static role → permission policy.
pub fn role_permissions(role: Role) -> Vec<Permission> {
    match role {
        Role::Owner | Role::Admin => vec![Permission::from_static("*")],
        Role::Cashier => CASHIER.iter().map(|p| Permission::from_static(p)).collect(),
        Role::Accountant => ACCOUNTANT.iter().map(|p| Permission::from_static(p)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" Cashier ".parse::<Role>().unwrap(), Role::Cashier);
        assert!("manager".parse::<Role>().is_err());
    }

    #[test]
    fn cashier_cannot_touch_the_ledger() {
        let perms = role_permissions(Role::Cashier);
        let ledger = Permission::new("ledger.write");
        assert!(!perms.iter().any(|p| p.grants(&ledger)));
        let checkout = Permission::new("pos.write");
        assert!(perms.iter().any(|p| p.grants(&checkout)));
    }
}
