use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use kedai_accounting::{entry_id_for, posting};
use kedai_company::DocumentKind;
use kedai_core::{Money, TenantId};
use kedai_customers::CustomerId;
use kedai_events::{EventBus, EventEnvelope};
use kedai_invoicing::{
    CancelInvoice, CreateInvoice, DeleteInvoice, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceLine,
    PaymentId, PaymentMethod, RecordPayment, SendInvoice, UpdateInvoice,
};
use kedai_products::StockReason;

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::retry::RetryPolicy;

use super::{
    DocumentNumbers, LedgerPoster, StockEffects, WorkflowError, describe, dry_run, ensure_customer, ensure_products,
    incomplete, restock_moves, sale_moves,
};

const SENT: &str = "invoice.sent";
const COGS: &str = "invoice.cogs";
const REVERSED: &str = "invoice.reversed";
const COGS_REVERSED: &str = "invoice.cogs_reversed";
const PAYMENT: &str = "invoice.payment";

/// Editable content of a draft invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub customer_id: CustomerId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Invoice lifecycle with its stock and ledger effects.
///
/// Sending takes the tracked products out of stock and posts receivable,
/// sales, SST and cost of sales. Cancelling or deleting a sent invoice puts
/// both back. Payments post against receivable.
pub struct InvoiceWorkflow<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    retry: RetryPolicy,
}

impl<'a, S, B> InvoiceWorkflow<'a, S, B>
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

    async fn load(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, DispatchError> {
        let invoice: Invoice = self.dispatcher.load(tenant_id, invoice_id.0).await?;
        if invoice.exists() {
            Ok(invoice)
        } else {
            Err(DispatchError::NotFound)
        }
    }

    /// Creates a DRAFT with the next invoice number.
    #[tracing::instrument(skip(self, draft, at), err)]
    pub async fn create(
        &self,
        tenant_id: TenantId,
        draft: InvoiceDraft,
        at: DateTime<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        ensure_customer(self.dispatcher, tenant_id, draft.customer_id).await?;
        ensure_products(self.dispatcher, tenant_id, &draft.lines).await?;

        let invoice_id = InvoiceId::generate();
        let mut command = CreateInvoice {
            tenant_id,
            invoice_id,
            number: "PENDING".to_string(),
            customer_id: draft.customer_id,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            lines: draft.lines,
            notes: draft.notes,
            occurred_at: at,
        };
        // Validate before a number is burned.
        dry_run::<Invoice, _, _>(
            self.dispatcher,
            tenant_id,
            invoice_id.0,
            &InvoiceCommand::CreateInvoice(command.clone()),
        )
        .await?;

        command.number = DocumentNumbers::new(self.dispatcher)
            .with_retry(self.retry)
            .reserve(tenant_id, DocumentKind::Invoice, at)
            .await?;
        self.dispatcher
            .send::<Invoice>(tenant_id, invoice_id.0, InvoiceCommand::CreateInvoice(command))
            .await?;
        Ok(self.load(tenant_id, invoice_id).await?)
    }

    /// Replaces the content of a DRAFT.
    #[tracing::instrument(skip(self, draft, at), err)]
    pub async fn update(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        draft: InvoiceDraft,
        at: DateTime<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        self.load(tenant_id, invoice_id).await?;
        ensure_customer(self.dispatcher, tenant_id, draft.customer_id).await?;
        ensure_products(self.dispatcher, tenant_id, &draft.lines).await?;

        let command = InvoiceCommand::UpdateInvoice(UpdateInvoice {
            tenant_id,
            invoice_id,
            customer_id: draft.customer_id,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            lines: draft.lines,
            notes: draft.notes,
            occurred_at: at,
        });
        self.dispatcher.send::<Invoice>(tenant_id, invoice_id.0, command).await?;
        Ok(self.load(tenant_id, invoice_id).await?)
    }

    /// DRAFT to SENT: stock out, then the sale and its cost on the ledger.
    #[tracing::instrument(skip(self, at), err)]
    pub async fn send(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        at: DateTime<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        let mut send = SendInvoice {
            tenant_id,
            invoice_id,
            stock_out: Vec::new(),
            occurred_at: at,
        };
        let (invoice, _) = dry_run::<Invoice, _, _>(
            self.dispatcher,
            tenant_id,
            invoice_id.0,
            &InvoiceCommand::SendInvoice(send.clone()),
        )
        .await?;
        if !invoice.exists() {
            return Err(DispatchError::NotFound.into());
        }
        let number = invoice.number().to_string();
        let customer_id = invoice.customer_id().ok_or(DispatchError::NotFound)?;
        ensure_customer(self.dispatcher, tenant_id, customer_id).await?;

        let stock = StockEffects::new(self.dispatcher).with_retry(self.retry);
        let applied = stock
            .apply(tenant_id, &sale_moves(invoice.lines()), StockReason::Sale, &number, at)
            .await?;
        send.stock_out = applied.stock_out();

        let command = InvoiceCommand::SendInvoice(send);
        if let Err(err) = self.dispatcher.send::<Invoice>(tenant_id, invoice_id.0, command).await {
            stock.compensate(tenant_id, &applied, at).await;
            return Err(err.into());
        }

        let document = describe("Invoice", &number);
        let totals = invoice.totals();
        let ledger = LedgerPoster::new(self.dispatcher).with_retry(self.retry);
        ledger
            .post(
                tenant_id,
                entry_id_for(invoice_id.0, SENT),
                posting::invoice_sent(totals.subtotal, totals.tax_total),
                &document,
                Some(&number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "sales posting", err))?;
        ledger
            .post(
                tenant_id,
                entry_id_for(invoice_id.0, COGS),
                posting::cost_of_sales(applied.cost()),
                &format!("Cost of sales, {document}"),
                Some(&number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "cost of sales posting", err))?;

        info!(%tenant_id, invoice = %number, total = %totals.total, "invoice sent");
        Ok(self.load(tenant_id, invoice_id).await?)
    }

    /// Records a payment and posts it against receivable.
    #[tracing::instrument(skip(self, reference, paid_at, at), err)]
    pub async fn record_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        amount: Money,
        method: PaymentMethod,
        reference: Option<String>,
        paid_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        let payment_id = PaymentId::generate();
        let command = InvoiceCommand::RecordPayment(RecordPayment {
            tenant_id,
            invoice_id,
            payment_id,
            amount,
            method,
            reference,
            paid_at,
            occurred_at: at,
        });
        self.dispatcher.send::<Invoice>(tenant_id, invoice_id.0, command).await?;

        let invoice = self.load(tenant_id, invoice_id).await?;
        let document = describe("Payment for invoice", invoice.number());
        LedgerPoster::new(self.dispatcher)
            .with_retry(self.retry)
            .post(
                tenant_id,
                entry_id_for(payment_id.0, PAYMENT),
                posting::payment_received(amount, method.is_cash()),
                &document,
                Some(invoice.number()),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "payment posting", err))?;
        Ok(invoice)
    }

    /// DRAFT or unpaid SENT to CANCELLED.
    #[tracing::instrument(skip(self, reason, at), err)]
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        let before = self.load(tenant_id, invoice_id).await?;
        let command = InvoiceCommand::CancelInvoice(CancelInvoice {
            tenant_id,
            invoice_id,
            reason,
            occurred_at: at,
        });
        let events = self.dispatcher.send::<Invoice>(tenant_id, invoice_id.0, command).await?;
        if events
            .iter()
            .any(|e| matches!(e, InvoiceEvent::Cancelled { reverse_effects: true, .. }))
        {
            self.reverse_effects(tenant_id, &before, at).await?;
        }
        Ok(self.load(tenant_id, invoice_id).await?)
    }

    /// Removes an invoice without payments. Returns the number it had.
    #[tracing::instrument(skip(self, at), err)]
    pub async fn delete(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        at: DateTime<Utc>,
    ) -> Result<String, WorkflowError> {
        let before = self.load(tenant_id, invoice_id).await?;
        let command = InvoiceCommand::DeleteInvoice(DeleteInvoice {
            tenant_id,
            invoice_id,
            occurred_at: at,
        });
        let events = self.dispatcher.send::<Invoice>(tenant_id, invoice_id.0, command).await?;
        if events
            .iter()
            .any(|e| matches!(e, InvoiceEvent::Deleted { reverse_effects: true, .. }))
        {
            self.reverse_effects(tenant_id, &before, at).await?;
        }
        Ok(before.number().to_string())
    }

    /// Puts back what [`send`](Self::send) took out and reverses its entries.
    async fn reverse_effects(&self, tenant_id: TenantId, invoice: &Invoice, at: DateTime<Utc>) -> Result<(), WorkflowError> {
        let invoice_id = invoice.id_typed();
        let number = invoice.number();
        let document = describe("Invoice", number);

        StockEffects::new(self.dispatcher)
            .with_retry(self.retry)
            .apply(
                tenant_id,
                &restock_moves(invoice.stock_out()),
                StockReason::SaleReversal,
                number,
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "stock restore", err))?;

        let ledger = LedgerPoster::new(self.dispatcher).with_retry(self.retry);
        ledger
            .reverse(
                tenant_id,
                entry_id_for(invoice_id.0, SENT),
                entry_id_for(invoice_id.0, REVERSED),
                &format!("Reversal, {document}"),
                Some(number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "sales reversal", err))?;
        ledger
            .reverse(
                tenant_id,
                entry_id_for(invoice_id.0, COGS),
                entry_id_for(invoice_id.0, COGS_REVERSED),
                &format!("Cost of sales reversal, {document}"),
                Some(number),
                at,
            )
            .await
            .map_err(|err| incomplete(&document, "cost of sales reversal", err))?;
        Ok(())
    }
}
