use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kedai_core::TenantId;
use kedai_customers::CustomerId;
use kedai_events::EventEnvelope;
use kedai_invoicing::{DocumentTotals, LineItem, PaymentMethod};
use kedai_sales::{PosOrderId, Receipt, ReceiptEvent, ReceiptId, ReceiptStatus, Settlement};

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::page::matches_search;
use crate::read_model::{InMemoryTenantStore, Page, PageRequest, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptReadModel {
    pub receipt_id: ReceiptId,
    pub number: String,
    pub customer_id: Option<CustomerId>,
    pub pos_order_id: Option<PosOrderId>,
    pub lines: Vec<LineItem>,
    pub totals: DocumentTotals,
    pub payment_method: PaymentMethod,
    pub settlement: Settlement,
    pub status: ReceiptStatus,
    pub void_reason: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptFilter {
    pub status: Option<ReceiptStatus>,
    pub payment_method: Option<PaymentMethod>,
    /// Matches the receipt number.
    pub search: Option<String>,
}

pub struct ReceiptsProjection<S = InMemoryTenantStore<ReceiptId, ReceiptReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl ReceiptsProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> ReceiptsProjection<S>
where
    S: TenantStore<ReceiptId, ReceiptReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, receipt_id: &ReceiptId) -> Option<ReceiptReadModel> {
        self.store.get(tenant_id, receipt_id)
    }

    /// Most recent first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<ReceiptReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then_with(|| b.number.cmp(&a.number)));
        all
    }

    pub fn query(&self, tenant_id: TenantId, filter: &ReceiptFilter, page: PageRequest) -> Page<ReceiptReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .filter(|r| filter.payment_method.is_none_or(|m| r.payment_method == m))
            .filter(|r| matches_search(filter.search.as_deref(), &[&r.number]))
            .collect();
        Page::slice(matching, page)
    }
}

impl<S> Projection for ReceiptsProjection<S>
where
    S: TenantStore<ReceiptId, ReceiptReadModel>,
{
    fn name(&self) -> &'static str {
        "receipts"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Receipt::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: ReceiptEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let receipt_id = ev.receipt_id();
        ensure_scope(envelope, tenant_id, receipt_id.0)?;

        match ev {
            ReceiptEvent::Issued {
                number,
                customer_id,
                pos_order_id,
                lines,
                totals,
                payment_method,
                settlement,
                occurred_at,
                ..
            } => {
                self.store.upsert(
                    tenant_id,
                    receipt_id,
                    ReceiptReadModel {
                        receipt_id,
                        number,
                        customer_id,
                        pos_order_id,
                        lines,
                        totals,
                        payment_method,
                        settlement,
                        status: ReceiptStatus::Issued,
                        void_reason: None,
                        issued_at: occurred_at,
                        voided_at: None,
                    },
                );
            }
            ReceiptEvent::Voided {
                reason, occurred_at, ..
            } => {
                if let Some(mut rm) = self.store.get(tenant_id, &receipt_id) {
                    rm.status = ReceiptStatus::Voided;
                    rm.void_reason = reason;
                    rm.voided_at = Some(occurred_at);
                    self.store.upsert(tenant_id, receipt_id, rm);
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::test_support::envelope;
    use kedai_core::{BasisPoints, Money};
    use kedai_sales::settle;

    fn issued(tenant: TenantId, id: ReceiptId, method: PaymentMethod) -> ReceiptEvent {
        let lines = vec![LineItem {
            line_no: 1,
            product_id: None,
            description: "Nasi lemak".to_string(),
            quantity: 2,
            unit_price: Money::from_sen(651),
            discount_rate: BasisPoints::zero(),
            tax_rate: BasisPoints::zero(),
            classification_code: None,
        }];
        let totals = DocumentTotals::from_lines(&lines).unwrap();
        ReceiptEvent::Issued {
            tenant_id: tenant,
            receipt_id: id,
            number: "RCT-000001".to_string(),
            customer_id: None,
            pos_order_id: None,
            lines,
            totals,
            payment_method: method,
            settlement: settle(totals.total, method, Some(Money::from_sen(2_000))).unwrap(),
            stock_out: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn issue_then_void() {
        let p = ReceiptsProjection::in_memory();
        let tenant = TenantId::new();
        let id = ReceiptId::generate();
        p.apply_envelope(&envelope(tenant, id.0, "sales.receipt", 1, &issued(tenant, id, PaymentMethod::Cash)))
            .unwrap();

        let rm = p.get(tenant, &id).unwrap();
        // 13.02 collected as 13.00
        assert_eq!(rm.settlement.payable, Money::from_sen(1_300));
        assert_eq!(rm.settlement.change, Money::from_sen(700));

        let void = ReceiptEvent::Voided {
            tenant_id: tenant,
            receipt_id: id,
            reason: Some("wrong table".to_string()),
            occurred_at: Utc::now(),
        };
        p.apply_envelope(&envelope(tenant, id.0, "sales.receipt", 2, &void)).unwrap();

        let rm = p.get(tenant, &id).unwrap();
        assert_eq!(rm.status, ReceiptStatus::Voided);
        assert_eq!(rm.void_reason.as_deref(), Some("wrong table"));

        let voided = p.query(
            tenant,
            &ReceiptFilter {
                status: Some(ReceiptStatus::Voided),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(voided.total, 1);
    }

    #[test]
    fn payload_for_another_stream_is_rejected() {
        let p = ReceiptsProjection::in_memory();
        let tenant = TenantId::new();
        let ev = issued(tenant, ReceiptId::generate(), PaymentMethod::Card);
        let err = p
            .apply_envelope(&envelope(tenant, ReceiptId::generate().0, "sales.receipt", 1, &ev))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::TenantIsolation(_)));
    }
}
