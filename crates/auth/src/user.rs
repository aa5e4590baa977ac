//! Staff account aggregate (event-sourced).
//!
//! A user belongs to exactly one company and holds exactly one role there.
//! Login is passwordless (TAC), so the aggregate only tracks identity,
//! role and whether the account may sign in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::validate::{normalize_my_phone, required, validate_email};
use kedai_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use kedai_events::Event;

use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    tenant_id: Option<TenantId>,
    email: String,
    name: String,
    phone: Option<String>,
    role: Role,
    status: UserStatus,
    version: u64,
    created: bool,
}

impl User {
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            tenant_id: None,
            email: String::new(),
            name: String::new(),
            phone: None,
            role: Role::Cashier,
            status: UserStatus::Active,
            version: 0,
            created: false,
        }
    }

    /// Stream id used by the event store for this user.
    pub fn stream_id(id: UserId) -> AggregateId {
        AggregateId::from_uuid(*id.as_uuid())
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> UserStatus {
        self.status
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    fn ensure_existing(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRole {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactivateUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserCommand {
    Register(RegisterUser),
    ChangeRole(ChangeRole),
    Suspend(SuspendUser),
    Reactivate(ReactivateUser),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegistered {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleChanged {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub from: Role,
    pub to: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSuspended {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReactivated {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserEvent {
    Registered(UserRegistered),
    RoleChanged(RoleChanged),
    Suspended(UserSuspended),
    Reactivated(UserReactivated),
}

impl UserEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            UserEvent::Registered(e) => e.tenant_id,
            UserEvent::RoleChanged(e) => e.tenant_id,
            UserEvent::Suspended(e) => e.tenant_id,
            UserEvent::Reactivated(e) => e.tenant_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            UserEvent::Registered(e) => e.user_id,
            UserEvent::RoleChanged(e) => e.user_id,
            UserEvent::Suspended(e) => e.user_id,
            UserEvent::Reactivated(e) => e.user_id,
        }
    }
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Registered(_) => "auth.user.registered",
            UserEvent::RoleChanged(_) => "auth.user.role_changed",
            UserEvent::Suspended(_) => "auth.user.suspended",
            UserEvent::Reactivated(_) => "auth.user.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Registered(e) => e.occurred_at,
            UserEvent::RoleChanged(e) => e.occurred_at,
            UserEvent::Suspended(e) => e.occurred_at,
            UserEvent::Reactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::Registered(e) => {
                self.id = e.user_id;
                self.tenant_id = Some(e.tenant_id);
                self.email = e.email.clone();
                self.name = e.name.clone();
                self.phone = e.phone.clone();
                self.role = e.role;
                self.status = UserStatus::Active;
                self.created = true;
            }
            UserEvent::RoleChanged(e) => self.role = e.to,
            UserEvent::Suspended(_) => self.status = UserStatus::Suspended,
            UserEvent::Reactivated(_) => self.status = UserStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Register(cmd) => self.handle_register(cmd),
            UserCommand::ChangeRole(cmd) => self.handle_change_role(cmd),
            UserCommand::Suspend(cmd) => self.handle_suspend(cmd),
            UserCommand::Reactivate(cmd) => self.handle_reactivate(cmd),
        }
    }
}

impl User {
    fn handle_register(&self, cmd: &RegisterUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user already exists"));
        }

        let email = validate_email(&cmd.email)?;
        let name = required("name", &cmd.name)?;
        let phone = match cmd.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => Some(normalize_my_phone(raw)?),
            None => None,
        };

        Ok(vec![UserEvent::Registered(UserRegistered {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            email,
            name,
            phone,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_role(&self, cmd: &ChangeRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;
        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user is suspended"));
        }
        if self.role == cmd.role {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::RoleChanged(RoleChanged {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            from: self.role,
            to: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;
        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user already suspended"));
        }

        Ok(vec![UserEvent::Suspended(UserSuspended {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;
        if self.status == UserStatus::Active {
            return Err(DomainError::invariant("user already active"));
        }

        Ok(vec![UserEvent::Reactivated(UserReactivated {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kedai_events::execute;

    fn registered(tenant_id: TenantId, role: Role) -> User {
        let user_id = UserId::new();
        let mut user = User::empty(user_id);
        execute(
            &mut user,
            &UserCommand::Register(RegisterUser {
                tenant_id,
                user_id,
                email: " Aminah@Kedai.MY".into(),
                name: "Aminah".into(),
                phone: Some("012-345 6789".into()),
                role,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        user
    }

    #[test]
    fn register_normalizes_contact_details() {
        let user = registered(TenantId::new(), Role::Cashier);
        assert_eq!(user.email(), "aminah@kedai.my");
        assert_eq!(user.phone(), Some("+60123456789"));
        assert_eq!(user.version(), 1);
    }

    #[test]
    fn register_rejects_bad_email() {
        let user_id = UserId::new();
        let err = User::empty(user_id)
            .handle(&UserCommand::Register(RegisterUser {
                tenant_id: TenantId::new(),
                user_id,
                email: "not-an-email".into(),
                name: "X".into(),
                phone: None,
                role: Role::Owner,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn suspended_user_cannot_change_role() {
        let tenant_id = TenantId::new();
        let mut user = registered(tenant_id, Role::Cashier);
        let user_id = *user.id();
        execute(
            &mut user,
            &UserCommand::Suspend(SuspendUser {
                tenant_id,
                user_id,
                reason: Some("left the company".into()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = user
            .handle(&UserCommand::ChangeRole(ChangeRole {
                tenant_id,
                user_id,
                role: Role::Admin,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("suspended"));
    }

    #[test]
    fn change_to_same_role_is_a_no_op() {
        let tenant_id = TenantId::new();
        let user = registered(tenant_id, Role::Accountant);
        let events = user
            .handle(&UserCommand::ChangeRole(ChangeRole {
                tenant_id,
                user_id: *user.id(),
                role: Role::Accountant,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn other_tenant_cannot_touch_user() {
        let user = registered(TenantId::new(), Role::Cashier);
        let err = user
            .handle(&UserCommand::Suspend(SuspendUser {
                tenant_id: TenantId::new(),
                user_id: *user.id(),
                reason: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }
}
