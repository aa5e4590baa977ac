use serde::{Deserialize, Serialize};

use kedai_core::{TenantId, UserId};

use crate::{Permission, Role, SessionClaims, role_permissions};

/// The roles and resolved permissions a user holds in one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl TenantMembership {
    pub fn from_roles(tenant_id: TenantId, roles: Vec<Role>) -> Self {
        let mut permissions: Vec<Permission> = Vec::new();
        for role in &roles {
            for perm in role_permissions(*role) {
                if !permissions.contains(&perm) {
                    permissions.push(perm);
                }
            }
        }
        Self {
            tenant_id,
            roles,
            permissions,
        }
    }
}

/// Authenticated actor for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    pub fn from_claims(claims: &SessionClaims) -> Self {
        Self {
            user_id: claims.sub,
            active_tenant_id: claims.tenant_id,
            membership: TenantMembership::from_roles(claims.tenant_id, claims.roles.clone()),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.membership.roles.contains(&role)
    }
}
