//! Read model builders.
//!
//! Every projection filters on its aggregate type, skips redelivered
//! envelopes through a per-stream cursor, checks the payload belongs to the
//! envelope's tenant and stream, and can be rebuilt from the event log.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use kedai_core::{AggregateId, TenantId};
use kedai_events::EventEnvelope;

pub mod companies;
pub mod cursor;
pub mod customers;
pub mod einvoices;
pub mod invoices;
pub mod ledger;
pub mod pos_orders;
pub mod products;
pub mod receipts;
pub mod users;

pub use companies::{CompaniesProjection, CompanyReadModel};
pub use cursor::StreamCursors;
pub use customers::{CustomerFilter, CustomerReadModel, CustomersProjection};
pub use einvoices::{EInvoiceDocumentReadModel, EInvoiceDocumentsProjection};
pub use invoices::{InvoiceFilter, InvoiceReadModel, InvoicesProjection};
pub use ledger::{AccountBalance, JournalEntryReadModel, LedgerProjection, TrialBalance, TrialBalanceLine};
pub use pos_orders::{PosOrderFilter, PosOrderReadModel, PosOrdersProjection};
pub use products::{ProductFilter, ProductReadModel, ProductsProjection};
pub use receipts::{ReceiptFilter, ReceiptReadModel, ReceiptsProjection};
pub use users::{UserReadModel, UsersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// A disposable, rebuildable read model fed from published envelopes.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Must be idempotent: redelivered envelopes are skipped.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drops the tenant's records and cursors.
    fn clear_tenant(&self, tenant_id: TenantId);

    /// Clears every tenant present in `envelopes`, then replays them in the
    /// order given (global append order).
    fn rebuild_from_scratch(&self, envelopes: &[EventEnvelope<JsonValue>]) -> Result<(), ProjectionError> {
        let mut tenants: Vec<TenantId> = envelopes.iter().map(|e| e.tenant_id()).collect();
        tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
        tenants.dedup();
        for t in tenants {
            self.clear_tenant(t);
        }

        for env in envelopes {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

pub(crate) fn decode<E: DeserializeOwned>(envelope: &EventEnvelope<JsonValue>) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize(e.to_string()))
}

/// The payload must name the envelope's tenant and stream.
pub(crate) fn ensure_scope(
    envelope: &EventEnvelope<JsonValue>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(), ProjectionError> {
    if tenant_id != envelope.tenant_id() {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    if aggregate_id != envelope.aggregate_id() {
        return Err(ProjectionError::TenantIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

/// Fans every envelope out to all registered projections.
#[derive(Clone, Default)]
pub struct Projections {
    entries: Vec<Arc<dyn Projection>>,
}

impl Projections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.entries.push(projection);
        self
    }

    /// Applies to every projection; one failing projection does not stop
    /// the others. Returns the number of failures.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> usize {
        let mut failures = 0;
        for p in &self.entries {
            if let Err(err) = p.apply_envelope(envelope) {
                failures += 1;
                warn!(
                    projection = p.name(),
                    tenant_id = %envelope.tenant_id(),
                    aggregate_id = %envelope.aggregate_id(),
                    sequence_number = envelope.sequence_number(),
                    error = %err,
                    "projection failed to apply event"
                );
            }
        }
        failures
    }

    pub fn rebuild(&self, envelopes: &[EventEnvelope<JsonValue>]) -> Result<(), ProjectionError> {
        for p in &self.entries {
            p.rebuild_from_scratch(envelopes)?;
        }
        Ok(())
    }
}

/// All read models of the backend, in memory.
#[derive(Clone)]
pub struct ReadModels {
    pub companies: Arc<CompaniesProjection>,
    pub users: Arc<UsersProjection>,
    pub customers: Arc<CustomersProjection>,
    pub products: Arc<ProductsProjection>,
    pub invoices: Arc<InvoicesProjection>,
    pub receipts: Arc<ReceiptsProjection>,
    pub pos_orders: Arc<PosOrdersProjection>,
    pub einvoices: Arc<EInvoiceDocumentsProjection>,
    pub ledger: Arc<LedgerProjection>,
}

impl ReadModels {
    pub fn in_memory() -> Self {
        Self {
            companies: Arc::new(CompaniesProjection::in_memory()),
            users: Arc::new(UsersProjection::in_memory()),
            customers: Arc::new(CustomersProjection::in_memory()),
            products: Arc::new(ProductsProjection::in_memory()),
            invoices: Arc::new(InvoicesProjection::in_memory()),
            receipts: Arc::new(ReceiptsProjection::in_memory()),
            pos_orders: Arc::new(PosOrdersProjection::in_memory()),
            einvoices: Arc::new(EInvoiceDocumentsProjection::in_memory()),
            ledger: Arc::new(LedgerProjection::in_memory()),
        }
    }

    pub fn projections(&self) -> Projections {
        Projections::new()
            .with(self.companies.clone())
            .with(self.users.clone())
            .with(self.customers.clone())
            .with(self.products.clone())
            .with(self.invoices.clone())
            .with(self.receipts.clone())
            .with(self.pos_orders.clone())
            .with(self.einvoices.clone())
            .with(self.ledger.clone())
    }
}

impl Default for ReadModels {
    fn default() -> Self {
        Self::in_memory()
    }
}
