use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Checks a principal against one required permission. Pure policy, no IO.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal
        .membership
        .permissions
        .iter()
        .any(|held| held.grants(required))
    {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, TenantMembership};
    use kedai_core::{TenantId, UserId};

    fn principal(roles: Vec<Role>) -> Principal {
        let tenant_id = TenantId::new();
        Principal {
            user_id: UserId::new(),
            active_tenant_id: tenant_id,
            membership: TenantMembership::from_roles(tenant_id, roles),
        }
    }

    #[test]
    fn owner_is_allowed_everything() {
        let p = principal(vec![Role::Owner]);
        assert!(authorize(&p, &Permission::new("billing.read")).is_ok());
    }

    #[test]
    fn accountant_cannot_run_the_till() {
        let p = principal(vec![Role::Accountant]);
        assert_eq!(
            authorize(&p, &Permission::new("pos.write")),
            Err(AuthzError::Forbidden("pos.write".into()))
        );
        assert!(authorize(&p, &Permission::new("invoices.write")).is_ok());
    }

    #[test]
    fn membership_for_other_tenant_is_rejected() {
        let mut p = principal(vec![Role::Owner]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::new("invoices.read")),
            Err(AuthzError::TenantMismatch)
        );
    }

    #[test]
    fn combined_roles_union_permissions() {
        let p = principal(vec![Role::Cashier, Role::Accountant]);
        assert!(authorize(&p, &Permission::new("pos.write")).is_ok());
        assert!(authorize(&p, &Permission::new("ledger.read")).is_ok());
        assert!(authorize(&p, &Permission::new("users.write")).is_err());
    }
}
