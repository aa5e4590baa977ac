//! Tenant-isolated read model storage.

pub mod page;
pub mod tenant_store;

pub use page::{Page, PageRequest};
pub use tenant_store::{InMemoryTenantStore, TenantStore};
