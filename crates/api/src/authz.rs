//! Permission guard applied before any command is dispatched.

use kedai_auth::{AuthzError, Permission, Principal, TenantMembership, authorize};

use crate::context::{PrincipalContext, TenantContext};

/// Checks every permission in `required` for the current request.
pub fn authorize_request(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    required: &[Permission],
) -> Result<(), AuthzError> {
    let principal = Principal {
        user_id: principal.user_id(),
        active_tenant_id: tenant.tenant_id(),
        membership: TenantMembership::from_roles(tenant.tenant_id(), principal.roles().to_vec()),
    };

    for perm in required {
        authorize(&principal, perm)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kedai_auth::Role;
    use kedai_core::{TenantId, UserId};

    #[test]
    fn cashier_may_sell_but_not_post_journals() {
        let tenant = TenantContext::new(TenantId::new());
        let cashier = PrincipalContext::new(UserId::new(), vec![Role::Cashier]);

        assert!(authorize_request(&tenant, &cashier, &[Permission::from_static("receipts.write")]).is_ok());
        assert!(matches!(
            authorize_request(&tenant, &cashier, &[Permission::from_static("ledger.write")]),
            Err(AuthzError::Forbidden(_))
        ));
    }
}
