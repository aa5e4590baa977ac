use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kedai_core::{Money, TenantId};
use kedai_customers::CustomerId;
use kedai_events::EventEnvelope;
use kedai_invoicing::{DocumentTotals, Invoice, InvoiceEvent, InvoiceId, InvoiceLine, InvoiceStatus, Payment};

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::page::matches_search;
use crate::read_model::{InMemoryTenantStore, Page, PageRequest, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub number: String,
    pub customer_id: CustomerId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub notes: Option<String>,
    pub totals: DocumentTotals,
    pub payments: Vec<Payment>,
    pub amount_paid: Money,
    pub balance_due: Money,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceReadModel {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Partial) && self.due_date < today
    }
}

/// `GET /invoices` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<CustomerId>,
    /// Matches the invoice number or notes.
    pub search: Option<String>,
}

/// Invoices per tenant. Deleted invoices are dropped from the model.
pub struct InvoicesProjection<S = InMemoryTenantStore<InvoiceId, InvoiceReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl InvoicesProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(tenant_id, invoice_id)
    }

    /// Newest issue date first, then by number descending.
    pub fn list(&self, tenant_id: TenantId) -> Vec<InvoiceReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| {
            b.issue_date
                .cmp(&a.issue_date)
                .then_with(|| b.number.cmp(&a.number))
        });
        all
    }

    pub fn query(&self, tenant_id: TenantId, filter: &InvoiceFilter, page: PageRequest) -> Page<InvoiceReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.customer_id.is_none_or(|c| i.customer_id == c))
            .filter(|i| {
                matches_search(
                    filter.search.as_deref(),
                    &[&i.number, i.notes.as_deref().unwrap_or("")],
                )
            })
            .collect();
        Page::slice(matching, page)
    }

    pub fn for_customer(&self, tenant_id: TenantId, customer_id: CustomerId) -> Vec<InvoiceReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|i| i.customer_id == customer_id)
            .collect()
    }

    pub fn overdue(&self, tenant_id: TenantId, today: NaiveDate) -> Vec<InvoiceReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|i| i.is_overdue(today))
            .collect()
    }

    fn update(&self, tenant_id: TenantId, invoice_id: InvoiceId, f: impl FnOnce(&mut InvoiceReadModel)) {
        if let Some(mut rm) = self.store.get(tenant_id, &invoice_id) {
            f(&mut rm);
            self.store.upsert(tenant_id, invoice_id, rm);
        }
    }
}

impl<S> Projection for InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    fn name(&self) -> &'static str {
        "invoices"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Invoice::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: InvoiceEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let invoice_id = ev.invoice_id();
        ensure_scope(envelope, tenant_id, invoice_id.0)?;

        match ev {
            InvoiceEvent::Created {
                number,
                customer_id,
                issue_date,
                due_date,
                lines,
                notes,
                totals,
                occurred_at,
                ..
            } => {
                self.store.upsert(
                    tenant_id,
                    invoice_id,
                    InvoiceReadModel {
                        invoice_id,
                        number,
                        customer_id,
                        issue_date,
                        due_date,
                        lines,
                        notes,
                        totals,
                        payments: Vec::new(),
                        amount_paid: Money::zero(),
                        balance_due: totals.total,
                        status: InvoiceStatus::Draft,
                        created_at: occurred_at,
                        sent_at: None,
                        updated_at: occurred_at,
                    },
                );
            }
            InvoiceEvent::Updated {
                customer_id,
                issue_date,
                due_date,
                lines,
                notes,
                totals,
                occurred_at,
                ..
            } => self.update(tenant_id, invoice_id, |rm| {
                rm.customer_id = customer_id;
                rm.issue_date = issue_date;
                rm.due_date = due_date;
                rm.lines = lines;
                rm.notes = notes;
                rm.totals = totals;
                rm.balance_due = totals.total - rm.amount_paid;
                rm.updated_at = occurred_at;
            }),
            InvoiceEvent::Sent { occurred_at, .. } => self.update(tenant_id, invoice_id, |rm| {
                rm.status = InvoiceStatus::Sent;
                rm.sent_at = Some(occurred_at);
                rm.updated_at = occurred_at;
            }),
            InvoiceEvent::PaymentRecorded {
                payment,
                amount_paid,
                status,
                occurred_at,
                ..
            } => self.update(tenant_id, invoice_id, |rm| {
                rm.payments.push(payment);
                rm.amount_paid = amount_paid;
                rm.balance_due = rm.totals.total - amount_paid;
                rm.status = status;
                rm.updated_at = occurred_at;
            }),
            InvoiceEvent::Cancelled { occurred_at, .. } => self.update(tenant_id, invoice_id, |rm| {
                rm.status = InvoiceStatus::Cancelled;
                rm.updated_at = occurred_at;
            }),
            InvoiceEvent::Deleted { .. } => {
                self.store.remove(tenant_id, &invoice_id);
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
