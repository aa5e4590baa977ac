//! `kedai-auth`: authentication and authorization boundary.
//!
//! Role/permission policy, signed session tokens, TAC (one-time login code)
//! issuance and the `User` aggregate. No HTTP and no storage in here.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod tac;
pub mod token;
pub mod user;

pub use authorize::{AuthzError, authorize};
pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use principal::{Principal, TenantMembership};
pub use roles::{Role, role_permissions};
pub use tac::{LogTacSender, TacError, TacIssuer, TacPolicy, TacSender};
pub use token::{SessionTokens, TokenError};
pub use user::{
    ChangeRole, ReactivateUser, RegisterUser, SuspendUser, User, UserCommand, UserEvent,
    UserStatus,
};
