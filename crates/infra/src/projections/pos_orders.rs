use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kedai_core::TenantId;
use kedai_events::EventEnvelope;
use kedai_invoicing::{DocumentTotals, PaymentMethod};
use kedai_sales::{OrderItem, OrderType, PosOrder, PosOrderEvent, PosOrderId, PosOrderStatus, ReceiptId, order_lines};

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, Page, PageRequest, TenantStore};
use crate::streams::StreamAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PosOrderReadModel {
    pub order_id: PosOrderId,
    pub number: String,
    pub order_type: OrderType,
    pub items: Vec<OrderItem>,
    /// Running totals of the current items; zero while empty.
    pub totals: DocumentTotals,
    pub status: PosOrderStatus,
    pub receipt_id: Option<ReceiptId>,
    pub payment_method: Option<PaymentMethod>,
    pub cancel_reason: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PosOrderReadModel {
    fn recompute(&mut self) {
        self.totals = if self.items.is_empty() {
            DocumentTotals::default()
        } else {
            DocumentTotals::from_lines(&order_lines(&self.items)).unwrap_or_default()
        };
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PosOrderFilter {
    pub status: Option<PosOrderStatus>,
    /// Only orders still on the floor (open, preparing, served).
    #[serde(default)]
    pub active: bool,
}

pub struct PosOrdersProjection<S = InMemoryTenantStore<PosOrderId, PosOrderReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl PosOrdersProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> PosOrdersProjection<S>
where
    S: TenantStore<PosOrderId, PosOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &PosOrderId) -> Option<PosOrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    /// Oldest first, the order a kitchen works through them.
    pub fn list(&self, tenant_id: TenantId) -> Vec<PosOrderReadModel> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.number.cmp(&b.number)));
        all
    }

    pub fn query(&self, tenant_id: TenantId, filter: &PosOrderFilter, page: PageRequest) -> Page<PosOrderReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .filter(|o| !filter.active || o.status.is_active())
            .collect();
        Page::slice(matching, page)
    }

    fn update(&self, tenant_id: TenantId, order_id: PosOrderId, at: DateTime<Utc>, f: impl FnOnce(&mut PosOrderReadModel)) {
        if let Some(mut rm) = self.store.get(tenant_id, &order_id) {
            f(&mut rm);
            rm.updated_at = at;
            self.store.upsert(tenant_id, order_id, rm);
        }
    }
}

impl<S> Projection for PosOrdersProjection<S>
where
    S: TenantStore<PosOrderId, PosOrderReadModel>,
{
    fn name(&self) -> &'static str {
        "pos_orders"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PosOrder::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: PosOrderEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        let order_id = ev.order_id();
        ensure_scope(envelope, tenant_id, order_id.0)?;

        match ev {
            PosOrderEvent::Opened {
                number,
                order_type,
                occurred_at,
                ..
            } => {
                self.store.upsert(
                    tenant_id,
                    order_id,
                    PosOrderReadModel {
                        order_id,
                        number,
                        order_type,
                        items: Vec::new(),
                        totals: DocumentTotals::default(),
                        status: PosOrderStatus::Open,
                        receipt_id: None,
                        payment_method: None,
                        cancel_reason: None,
                        opened_at: occurred_at,
                        updated_at: occurred_at,
                    },
                );
            }
            PosOrderEvent::ItemAdded { item, occurred_at, .. } => {
                self.update(tenant_id, order_id, occurred_at, |rm| {
                    rm.items.push(item);
                    rm.recompute();
                })
            }
            PosOrderEvent::ItemQuantityChanged {
                item_id,
                quantity,
                occurred_at,
                ..
            } => self.update(tenant_id, order_id, occurred_at, |rm| {
                if let Some(item) = rm.items.iter_mut().find(|i| i.item_id == item_id) {
                    item.quantity = quantity;
                }
                rm.recompute();
            }),
            PosOrderEvent::ItemRemoved {
                item_id, occurred_at, ..
            } => self.update(tenant_id, order_id, occurred_at, |rm| {
                rm.items.retain(|i| i.item_id != item_id);
                rm.recompute();
            }),
            PosOrderEvent::SentToKitchen { occurred_at, .. } => {
                self.update(tenant_id, order_id, occurred_at, |rm| rm.status = PosOrderStatus::Preparing)
            }
            PosOrderEvent::Served { occurred_at, .. } => {
                self.update(tenant_id, order_id, occurred_at, |rm| rm.status = PosOrderStatus::Served)
            }
            PosOrderEvent::Completed {
                receipt_id,
                payment_method,
                totals,
                occurred_at,
                ..
            } => self.update(tenant_id, order_id, occurred_at, |rm| {
                rm.status = PosOrderStatus::Completed;
                rm.receipt_id = Some(receipt_id);
                rm.payment_method = Some(payment_method);
                rm.totals = totals;
            }),
            PosOrderEvent::Cancelled {
                reason, occurred_at, ..
            } => self.update(tenant_id, order_id, occurred_at, |rm| {
                rm.status = PosOrderStatus::Cancelled;
                rm.cancel_reason = reason;
            }),
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
