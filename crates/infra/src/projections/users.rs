//! Staff directory. Besides the per-tenant records it keeps a global
//! email index, which is how a TAC login finds the user's company.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use kedai_auth::{Role, User, UserEvent, UserStatus};
use kedai_core::{TenantId, UserId};
use kedai_events::EventEnvelope;

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReadModel {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserReadModel {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct UsersProjection<S = InMemoryTenantStore<UserId, UserReadModel>> {
    store: S,
    by_email: RwLock<HashMap<String, (TenantId, UserId)>>,
    cursors: StreamCursors,
}

impl UsersProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> UsersProjection<S>
where
    S: TenantStore<UserId, UserReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            by_email: RwLock::new(HashMap::new()),
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, user_id: &UserId) -> Option<UserReadModel> {
        self.store.get(tenant_id, user_id)
    }

    /// Oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<UserReadModel> {
        let mut users = self.store.list(tenant_id);
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
        users
    }

    /// Looks an email up across all tenants.
    pub fn find_by_email(&self, email: &str) -> Option<UserReadModel> {
        let (tenant_id, user_id) = {
            let index = self.by_email.read().ok()?;
            *index.get(&email_key(email))?
        };
        self.store.get(tenant_id, &user_id)
    }

    pub fn email_taken(&self, email: &str) -> bool {
        self.by_email
            .read()
            .map(|index| index.contains_key(&email_key(email)))
            .unwrap_or(false)
    }

    /// Active owners of a tenant.
    pub fn owner_count(&self, tenant_id: TenantId) -> usize {
        self.store
            .list(tenant_id)
            .iter()
            .filter(|u| u.role == Role::Owner && u.is_active())
            .count()
    }

    fn update(&self, tenant_id: TenantId, user_id: UserId, at: DateTime<Utc>, f: impl FnOnce(&mut UserReadModel)) {
        if let Some(mut rm) = self.store.get(tenant_id, &user_id) {
            f(&mut rm);
            rm.updated_at = at;
            self.store.upsert(tenant_id, user_id, rm);
        }
    }
}

impl<S> Projection for UsersProjection<S>
where
    S: TenantStore<UserId, UserReadModel>,
{
    fn name(&self) -> &'static str {
        "users"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != User::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: UserEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let user_id = ev.user_id();
        ensure_scope(envelope, tenant_id, User::stream_id(user_id))?;

        match ev {
            UserEvent::Registered(e) => {
                if let Ok(mut index) = self.by_email.write() {
                    index.insert(email_key(&e.email), (tenant_id, user_id));
                }
                self.store.upsert(
                    tenant_id,
                    user_id,
                    UserReadModel {
                        user_id,
                        tenant_id,
                        email: e.email,
                        name: e.name,
                        phone: e.phone,
                        role: e.role,
                        status: UserStatus::Active,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            UserEvent::RoleChanged(e) => self.update(tenant_id, user_id, e.occurred_at, |rm| rm.role = e.to),
            UserEvent::Suspended(e) => {
                self.update(tenant_id, user_id, e.occurred_at, |rm| rm.status = UserStatus::Suspended)
            }
            UserEvent::Reactivated(e) => {
                self.update(tenant_id, user_id, e.occurred_at, |rm| rm.status = UserStatus::Active)
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        if let Ok(mut index) = self.by_email.write() {
            index.retain(|_, (t, _)| *t != tenant_id);
        }
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::test_support::envelope;
    use kedai_auth::user::{RoleChanged, UserRegistered, UserSuspended};

    fn register(p: &UsersProjection, tenant: TenantId, email: &str, role: Role) -> UserId {
        let user_id = UserId::new();
        let ev = UserEvent::Registered(UserRegistered {
            tenant_id: tenant,
            user_id,
            email: email.to_string(),
            name: "Siti".to_string(),
            phone: None,
            role,
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&envelope(tenant, User::stream_id(user_id), "auth.user", 1, &ev))
            .unwrap();
        user_id
    }

    #[test]
    fn email_index_spans_tenants() {
        let p = UsersProjection::in_memory();
        let (a, b) = (TenantId::new(), TenantId::new());
        register(&p, a, "owner@kedai.my", Role::Owner);
        let cashier = register(&p, b, "Cashier@Kedai.my", Role::Cashier);

        let found = p.find_by_email("cashier@kedai.my").unwrap();
        assert_eq!(found.tenant_id, b);
        assert_eq!(found.user_id, cashier);
        assert!(p.email_taken("OWNER@kedai.my"));

        p.clear_tenant(b);
        assert!(p.find_by_email("cashier@kedai.my").is_none());
        assert!(p.email_taken("owner@kedai.my"));
    }

    #[test]
    fn owner_count_ignores_suspended_and_demoted() {
        let p = UsersProjection::in_memory();
        let tenant = TenantId::new();
        let first = register(&p, tenant, "a@kedai.my", Role::Owner);
        let second = register(&p, tenant, "b@kedai.my", Role::Owner);
        assert_eq!(p.owner_count(tenant), 2);

        let suspend = UserEvent::Suspended(UserSuspended {
            tenant_id: tenant,
            user_id: first,
            reason: None,
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&envelope(tenant, User::stream_id(first), "auth.user", 2, &suspend))
            .unwrap();
        let demote = UserEvent::RoleChanged(RoleChanged {
            tenant_id: tenant,
            user_id: second,
            from: Role::Owner,
            to: Role::Admin,
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&envelope(tenant, User::stream_id(second), "auth.user", 2, &demote))
            .unwrap();

        assert_eq!(p.owner_count(tenant), 0);
    }

    #[test]
    fn redelivery_is_ignored() {
        let p = UsersProjection::in_memory();
        let tenant = TenantId::new();
        let user_id = UserId::new();
        let ev = UserEvent::Registered(UserRegistered {
            tenant_id: tenant,
            user_id,
            email: "x@kedai.my".to_string(),
            name: "X".to_string(),
            phone: None,
            role: Role::Cashier,
            occurred_at: Utc::now(),
        });
        let env = envelope(tenant, User::stream_id(user_id), "auth.user", 1, &ev);
        p.apply_envelope(&env).unwrap();
        p.apply_envelope(&env).unwrap();
        assert_eq!(p.list(tenant).len(), 1);
    }
}
