//! Cross-aggregate side effects of sales documents.
//!
//! Domain crates stay pure; the effects a document has on stock and on the
//! ledger are orchestrated here over the command dispatcher:
//!
//! ```text
//! validate (dry run on the loaded aggregate)
//!   -> stock moves in line order (compensated if anything below fails)
//!   -> document command
//!   -> ledger posting (deterministic entry ids, logged on failure)
//! ```

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::error;

use kedai_core::{Aggregate, AggregateId, DomainError, TenantId};
use kedai_customers::{Customer, CustomerId};
use kedai_events::{EventBus, EventEnvelope};
use kedai_invoicing::{LineItem, StockOut, product_quantities};
use kedai_products::Product;

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::streams::StreamAggregate;

pub mod invoice;
pub mod ledger;
pub mod numbering;
pub mod pos;
pub mod receipt;
pub mod stock;

pub use invoice::{InvoiceDraft, InvoiceWorkflow};
pub use ledger::LedgerPoster;
pub use numbering::DocumentNumbers;
pub use pos::PosCheckout;
pub use receipt::{ReceiptDraft, ReceiptWorkflow};
pub use stock::{AppliedStock, StockEffects, StockMove};

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Nothing was committed (stock moves were compensated).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The document command is committed but a follow-up effect is not.
    #[error("{document}: {effect} failed after commit: {source}")]
    Incomplete {
        document: String,
        effect: &'static str,
        source: DispatchError,
    },
}

impl WorkflowError {
    /// The underlying dispatch error either way.
    pub fn dispatch_error(&self) -> &DispatchError {
        match self {
            WorkflowError::Dispatch(err) => err,
            WorkflowError::Incomplete { source, .. } => source,
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        WorkflowError::Dispatch(value.into())
    }
}

pub(crate) fn incomplete(document: &str, effect: &'static str, err: DispatchError) -> WorkflowError {
    error!(document, effect, error = %err, "side effect failed after commit");
    WorkflowError::Incomplete {
        document: document.to_string(),
        effect,
        source: err,
    }
}

/// Documents may only be raised for active customers.
pub(crate) async fn ensure_customer<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    customer_id: CustomerId,
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let customer: Customer = dispatcher.load(tenant_id, customer_id.0).await?;
    if !customer.exists() {
        return Err(DispatchError::Validation(format!("unknown customer {customer_id}")));
    }
    if !customer.can_transact() {
        return Err(DispatchError::Validation(format!("customer {customer_id} is archived")));
    }
    Ok(())
}

/// Every product referenced by `lines` must exist and be on sale.
pub(crate) async fn ensure_products<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    lines: &[LineItem],
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    for (product_id, _) in product_quantities(lines) {
        let product: Product = dispatcher.load(tenant_id, product_id.0).await?;
        if !product.exists() {
            return Err(DispatchError::Validation(format!("unknown product {product_id}")));
        }
        if !product.can_be_sold() {
            return Err(DispatchError::Validation(format!(
                "product {} is archived",
                product.name()
            )));
        }
    }
    Ok(())
}

/// Negated quantities: what a sale takes out of stock.
pub(crate) fn sale_moves(lines: &[LineItem]) -> Vec<(kedai_products::ProductId, i64)> {
    product_quantities(lines)
        .into_iter()
        .map(|(id, qty)| (id, -qty))
        .collect()
}

/// Puts back what a document recorded as taken out.
pub(crate) fn restock_moves(stock_out: &[StockOut]) -> Vec<(kedai_products::ProductId, i64)> {
    stock_out.iter().map(|s| (s.product_id, s.quantity)).collect()
}

/// Loads the aggregate and runs `command` against it without storing
/// anything, so a doomed command fails before any side effect.
pub(crate) async fn dry_run<A, S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    command: &A::Command,
) -> Result<(A, Vec<A::Event>), DispatchError>
where
    A: StreamAggregate,
    A::Event: serde::de::DeserializeOwned,
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let aggregate: A = dispatcher.load(tenant_id, aggregate_id).await?;
    let decided = aggregate.handle(command)?;
    Ok((aggregate, decided))
}

/// `reference` on stock moves and `source` on journal entries.
pub(crate) fn describe(kind: &str, number: &str) -> String {
    if number.is_empty() {
        kind.to_string()
    } else {
        format!("{kind} {number}")
    }
}
