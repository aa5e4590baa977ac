use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kedai_core::TenantId;
use kedai_customers::{Customer, CustomerDetails, CustomerEvent, CustomerId, CustomerStatus};
use kedai_events::EventEnvelope;

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::page::matches_search;
use crate::read_model::{InMemoryTenantStore, Page, PageRequest, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerReadModel {
    pub customer_id: CustomerId,
    #[serde(flatten)]
    pub details: CustomerDetails,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `GET /customers` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    /// Matches name, email, phone or TIN.
    pub search: Option<String>,
    pub status: Option<CustomerStatus>,
}

pub struct CustomersProjection<S = InMemoryTenantStore<CustomerId, CustomerReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl CustomersProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> CustomersProjection<S>
where
    S: TenantStore<CustomerId, CustomerReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, customer_id: &CustomerId) -> Option<CustomerReadModel> {
        self.store.get(tenant_id, customer_id)
    }

    /// Sorted by name.
    pub fn list(&self, tenant_id: TenantId) -> Vec<CustomerReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| {
            a.details
                .name
                .to_lowercase()
                .cmp(&b.details.name.to_lowercase())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        all
    }

    pub fn query(&self, tenant_id: TenantId, filter: &CustomerFilter, page: PageRequest) -> Page<CustomerReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|c| filter.status.is_none_or(|s| c.status == s))
            .filter(|c| {
                matches_search(
                    filter.search.as_deref(),
                    &[
                        &c.details.name,
                        c.details.contact.email.as_deref().unwrap_or(""),
                        c.details.contact.phone.as_deref().unwrap_or(""),
                        c.details.tax.tin.as_deref().unwrap_or(""),
                    ],
                )
            })
            .collect();
        Page::slice(matching, page)
    }

    fn set_status(&self, tenant_id: TenantId, customer_id: CustomerId, status: CustomerStatus, at: DateTime<Utc>) {
        if let Some(mut rm) = self.store.get(tenant_id, &customer_id) {
            rm.status = status;
            rm.updated_at = at;
            self.store.upsert(tenant_id, customer_id, rm);
        }
    }
}

impl<S> Projection for CustomersProjection<S>
where
    S: TenantStore<CustomerId, CustomerReadModel>,
{
    fn name(&self) -> &'static str {
        "customers"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Customer::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: CustomerEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let customer_id = ev.customer_id();
        ensure_scope(envelope, tenant_id, customer_id.0)?;

        match ev {
            CustomerEvent::Registered {
                details, occurred_at, ..
            } => {
                self.store.upsert(
                    tenant_id,
                    customer_id,
                    CustomerReadModel {
                        customer_id,
                        details,
                        status: CustomerStatus::Active,
                        created_at: occurred_at,
                        updated_at: occurred_at,
                    },
                );
            }
            CustomerEvent::Updated {
                details, occurred_at, ..
            } => {
                if let Some(mut rm) = self.store.get(tenant_id, &customer_id) {
                    rm.details = details;
                    rm.updated_at = occurred_at;
                    self.store.upsert(tenant_id, customer_id, rm);
                }
            }
            CustomerEvent::Archived { occurred_at, .. } => {
                self.set_status(tenant_id, customer_id, CustomerStatus::Archived, occurred_at)
            }
            CustomerEvent::Restored { occurred_at, .. } => {
                self.set_status(tenant_id, customer_id, CustomerStatus::Active, occurred_at)
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
