//! `kedai-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the aggregate contract, the domain error model, MYR money and
//! the Malaysian field validators shared by every bounded context.

pub mod address;
pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod validate;

pub use address::Address;
pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use money::{BasisPoints, Money};
