use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::error;

use kedai_company::DocumentKind;
use kedai_core::{Money, TenantId};
use kedai_events::{EventBus, EventEnvelope};
use kedai_invoicing::PaymentMethod;
use kedai_sales::{OrderType, PosOrder, PosOrderCommand, PosOrderId, Receipt, ReceiptId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::retry::RetryPolicy;

use super::{DocumentNumbers, ReceiptDraft, ReceiptWorkflow, WorkflowError, dry_run};

/// Opening and checking out POS orders.
///
/// Checkout issues a receipt for the order lines (stock and ledger effects
/// included) and then completes the order with the receipt attached. If the
/// order cannot be completed, the receipt is voided again.
pub struct PosCheckout<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    retry: RetryPolicy,
}

impl<'a, S, B> PosCheckout<'a, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: &'a CommandDispatcher<S, B>) -> Self {
        Self {
            dispatcher,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Opens an order under the next order number.
    #[tracing::instrument(skip(self, at), err)]
    pub async fn open_order(
        &self,
        tenant_id: TenantId,
        order_type: OrderType,
        at: DateTime<Utc>,
    ) -> Result<PosOrder, WorkflowError> {
        let order_id = PosOrderId::generate();
        let mut command = PosOrderCommand::OpenOrder {
            tenant_id,
            order_id,
            number: "PENDING".to_string(),
            order_type,
            opened_at: at,
        };
        dry_run::<PosOrder, _, _>(self.dispatcher, tenant_id, order_id.0, &command).await?;

        let reserved = DocumentNumbers::new(self.dispatcher)
            .with_retry(self.retry)
            .reserve(tenant_id, DocumentKind::PosOrder, at)
            .await?;
        if let PosOrderCommand::OpenOrder { number, .. } = &mut command {
            *number = reserved;
        }
        self.dispatcher.send::<PosOrder>(tenant_id, order_id.0, command).await?;
        Ok(self.dispatcher.load(tenant_id, order_id.0).await?)
    }

    #[tracing::instrument(skip(self, amount_tendered, at), err)]
    pub async fn complete(
        &self,
        tenant_id: TenantId,
        order_id: PosOrderId,
        payment_method: PaymentMethod,
        amount_tendered: Option<Money>,
        at: DateTime<Utc>,
    ) -> Result<(PosOrder, Receipt), WorkflowError> {
        let receipt_id = ReceiptId::generate();
        let command = PosOrderCommand::CompleteOrder {
            tenant_id,
            order_id,
            receipt_id,
            payment_method,
            amount_tendered,
            occurred_at: at,
        };
        let (order, _) = dry_run::<PosOrder, _, _>(self.dispatcher, tenant_id, order_id.0, &command).await?;

        let receipts = ReceiptWorkflow::new(self.dispatcher).with_retry(self.retry);
        let draft = ReceiptDraft {
            customer_id: None,
            pos_order_id: Some(order_id),
            lines: order.lines(),
            payment_method,
            amount_tendered,
        };
        let receipt = receipts.issue(tenant_id, receipt_id, draft, at).await?;

        if let Err(err) = self.dispatcher.send::<PosOrder>(tenant_id, order_id.0, command).await {
            error!(
                %tenant_id,
                order = order.number(),
                receipt = receipt.number(),
                error = %err,
                "order completion failed, voiding receipt"
            );
            let reason = format!("checkout of order {} failed", order.number());
            if let Err(void_err) = receipts.void(tenant_id, receipt_id, Some(reason), at).await {
                error!(%tenant_id, receipt = receipt.number(), error = %void_err, "receipt void failed");
            }
            return Err(err.into());
        }

        let order: PosOrder = self.dispatcher.load(tenant_id, order_id.0).await?;
        Ok((order, receipt))
    }

    /// Cancels an active order. Nothing was sold, so nothing to undo.
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        order_id: PosOrderId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<PosOrder, WorkflowError> {
        let command = PosOrderCommand::CancelOrder {
            tenant_id,
            order_id,
            reason,
            occurred_at: at,
        };
        self.dispatcher.send::<PosOrder>(tenant_id, order_id.0, command).await?;
        let order: PosOrder = self.dispatcher.load(tenant_id, order_id.0).await?;
        if order.exists() {
            Ok(order)
        } else {
            Err(DispatchError::NotFound.into())
        }
    }
}
