use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use kedai_core::{Money, TenantId};
use kedai_events::{EventBus, EventEnvelope};
use kedai_invoicing::StockOut;
use kedai_products::{AdjustStock, Product, ProductCommand, ProductId, StockReason};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::retry::{RetryPolicy, retry_on_conflict};

/// One applied adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockMove {
    pub product_id: ProductId,
    pub delta: i64,
    /// Cost price at the time of the move.
    pub unit_cost: Money,
}

/// Moves applied for one document, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedStock {
    pub moves: Vec<StockMove>,
    pub reason: Option<StockReason>,
    pub reference: String,
}

impl AppliedStock {
    /// Value of the moved units at cost (always positive).
    pub fn cost(&self) -> Money {
        self.moves
            .iter()
            .map(|m| Money::from_sen(m.unit_cost.sen() * m.delta.abs()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Outgoing moves as recorded on the sending document.
    pub fn stock_out(&self) -> Vec<StockOut> {
        self.moves
            .iter()
            .filter(|m| m.delta < 0)
            .map(|m| StockOut {
                product_id: m.product_id,
                quantity: -m.delta,
            })
            .collect()
    }
}

/// Stock side of sales documents. Untracked products are skipped.
pub struct StockEffects<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    retry: RetryPolicy,
}

impl<'a, S, B> StockEffects<'a, S, B>
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

    /// Applies `quantities` (product, signed delta) in order. When one move
    /// fails, the moves already applied are undone and the error returned.
    #[tracing::instrument(skip(self, quantities, at), fields(moves = quantities.len()), err)]
    pub async fn apply(
        &self,
        tenant_id: TenantId,
        quantities: &[(ProductId, i64)],
        reason: StockReason,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedStock, DispatchError> {
        let mut applied = AppliedStock {
            moves: Vec::new(),
            reason: Some(reason),
            reference: reference.to_string(),
        };

        for &(product_id, delta) in quantities {
            if delta == 0 {
                continue;
            }
            match self.adjust(tenant_id, product_id, delta, reason, reference, at).await {
                Ok(Some(mv)) => applied.moves.push(mv),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        tenant_id = %tenant_id,
                        product_id = %product_id,
                        reference,
                        error = %err,
                        "stock move failed, compensating"
                    );
                    self.compensate(tenant_id, &applied, at).await;
                    return Err(err);
                }
            }
        }
        Ok(applied)
    }

    /// Undoes `applied` in reverse order. Failures are logged; there is
    /// nothing left to roll back to.
    pub async fn compensate(&self, tenant_id: TenantId, applied: &AppliedStock, at: DateTime<Utc>) {
        let reason = match applied.reason {
            Some(StockReason::Sale) => StockReason::SaleReversal,
            Some(StockReason::SaleReversal) => StockReason::Sale,
            _ => StockReason::Correction,
        };
        for mv in applied.moves.iter().rev() {
            let result = self
                .adjust(tenant_id, mv.product_id, -mv.delta, reason, &applied.reference, at)
                .await;
            if let Err(err) = result {
                error!(
                    tenant_id = %tenant_id,
                    product_id = %mv.product_id,
                    delta = -mv.delta,
                    reference = %applied.reference,
                    error = %err,
                    "stock compensation failed"
                );
            }
        }
    }

    async fn adjust(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        delta: i64,
        reason: StockReason,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<StockMove>, DispatchError> {
        retry_on_conflict(self.retry, || async move {
            let product: Product = self.dispatcher.load(tenant_id, product_id.0).await?;
            if !product.exists() {
                return Err(DispatchError::Validation(format!("unknown product {product_id}")));
            }
            if !product.tracks_stock() {
                return Ok(None);
            }
            let command = ProductCommand::AdjustStock(AdjustStock {
                tenant_id,
                product_id,
                delta,
                reason,
                reference: Some(reference.to_string()),
                occurred_at: at,
            });
            self.dispatcher
                .send::<Product>(tenant_id, product_id.0, command)
                .await?;
            Ok(Some(StockMove {
                product_id,
                delta,
                unit_cost: product.cost_price(),
            }))
        })
        .await
    }
}
