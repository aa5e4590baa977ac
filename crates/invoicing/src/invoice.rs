use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::{Aggregate, AggregateRoot, DomainError, Money, TenantId};
use kedai_customers::CustomerId;
use kedai_events::Event;

use crate::line::{DocumentTotals, InvoiceLine, StockOut, validate_stock_out};

kedai_core::typed_id!(InvoiceId, "InvoiceId");
kedai_core::typed_id!(PaymentId, "PaymentId");

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Partial,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// Counts towards sales and receivables.
    pub fn is_billed(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent | InvoiceStatus::Partial | InvoiceStatus::Paid
        )
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(InvoiceStatus::Draft),
            "SENT" => Ok(InvoiceStatus::Sent),
            "PARTIAL" => Ok(InvoiceStatus::Partial),
            "PAID" => Ok(InvoiceStatus::Paid),
            "CANCELLED" => Ok(InvoiceStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown invoice status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Ewallet,
    BankTransfer,
}

impl PaymentMethod {
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

/// A payment applied to an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    number: String,
    customer_id: Option<CustomerId>,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    lines: Vec<InvoiceLine>,
    notes: Option<String>,
    totals: DocumentTotals,
    payments: Vec<Payment>,
    amount_paid: Money,
    status: InvoiceStatus,
    /// Stock was deducted and sales posted for this invoice.
    effects_applied: bool,
    stock_out: Vec<StockOut>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            customer_id: None,
            issue_date: None,
            due_date: None,
            lines: Vec::new(),
            notes: None,
            totals: DocumentTotals::default(),
            payments: Vec::new(),
            amount_paid: Money::zero(),
            status: InvoiceStatus::Draft,
            effects_applied: false,
            stock_out: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    pub fn balance_due(&self) -> Money {
        self.totals.total - self.amount_paid
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    /// Stock taken out when the invoice was sent.
    pub fn stock_out(&self) -> &[StockOut] {
        &self.stock_out
    }

    pub fn effects_applied(&self) -> bool {
        self.effects_applied
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Partial)
            && self.due_date.is_some_and(|due| due < today)
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice (as DRAFT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub number: String,
    pub customer_id: CustomerId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateInvoice (DRAFT only; replaces the editable content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    /// Stock moves the caller applied for this send.
    #[serde(default)]
    pub stock_out: Vec<StockOut>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    UpdateInvoice(UpdateInvoice),
    SendInvoice(SendInvoice),
    RecordPayment(RecordPayment),
    CancelInvoice(CancelInvoice),
    DeleteInvoice(DeleteInvoice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    Created {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        number: String,
        customer_id: CustomerId,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        lines: Vec<InvoiceLine>,
        notes: Option<String>,
        totals: DocumentTotals,
        occurred_at: DateTime<Utc>,
    },
    Updated {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        customer_id: CustomerId,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        lines: Vec<InvoiceLine>,
        notes: Option<String>,
        totals: DocumentTotals,
        occurred_at: DateTime<Utc>,
    },
    /// Carries the final lines so stock and ledger effects can be derived
    /// from the event alone.
    Sent {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        number: String,
        customer_id: CustomerId,
        lines: Vec<InvoiceLine>,
        totals: DocumentTotals,
        #[serde(default)]
        stock_out: Vec<StockOut>,
        occurred_at: DateTime<Utc>,
    },
    PaymentRecorded {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment: Payment,
        amount_paid: Money,
        status: InvoiceStatus,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: Option<String>,
        /// Stock and postings of the send must be reversed.
        reverse_effects: bool,
        occurred_at: DateTime<Utc>,
    },
    Deleted {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reverse_effects: bool,
        occurred_at: DateTime<Utc>,
    },
}

impl InvoiceEvent {
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::Created { invoice_id, .. }
            | InvoiceEvent::Updated { invoice_id, .. }
            | InvoiceEvent::Sent { invoice_id, .. }
            | InvoiceEvent::PaymentRecorded { invoice_id, .. }
            | InvoiceEvent::Cancelled { invoice_id, .. }
            | InvoiceEvent::Deleted { invoice_id, .. } => *invoice_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            InvoiceEvent::Created { tenant_id, .. }
            | InvoiceEvent::Updated { tenant_id, .. }
            | InvoiceEvent::Sent { tenant_id, .. }
            | InvoiceEvent::PaymentRecorded { tenant_id, .. }
            | InvoiceEvent::Cancelled { tenant_id, .. }
            | InvoiceEvent::Deleted { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Created { .. } => "invoicing.invoice.created",
            InvoiceEvent::Updated { .. } => "invoicing.invoice.updated",
            InvoiceEvent::Sent { .. } => "invoicing.invoice.sent",
            InvoiceEvent::PaymentRecorded { .. } => "invoicing.invoice.payment_recorded",
            InvoiceEvent::Cancelled { .. } => "invoicing.invoice.cancelled",
            InvoiceEvent::Deleted { .. } => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::Created { occurred_at, .. }
            | InvoiceEvent::Updated { occurred_at, .. }
            | InvoiceEvent::Sent { occurred_at, .. }
            | InvoiceEvent::PaymentRecorded { occurred_at, .. }
            | InvoiceEvent::Cancelled { occurred_at, .. }
            | InvoiceEvent::Deleted { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Created {
                tenant_id,
                invoice_id,
                number,
                customer_id,
                issue_date,
                due_date,
                lines,
                notes,
                totals,
                ..
            } => {
                self.id = *invoice_id;
                self.tenant_id = Some(*tenant_id);
                self.number = number.clone();
                self.customer_id = Some(*customer_id);
                self.issue_date = Some(*issue_date);
                self.due_date = Some(*due_date);
                self.lines = lines.clone();
                self.notes = notes.clone();
                self.totals = *totals;
                self.status = InvoiceStatus::Draft;
                self.created = true;
            }
            InvoiceEvent::Updated {
                customer_id,
                issue_date,
                due_date,
                lines,
                notes,
                totals,
                ..
            } => {
                self.customer_id = Some(*customer_id);
                self.issue_date = Some(*issue_date);
                self.due_date = Some(*due_date);
                self.lines = lines.clone();
                self.notes = notes.clone();
                self.totals = *totals;
            }
            InvoiceEvent::Sent { stock_out, .. } => {
                self.status = InvoiceStatus::Sent;
                self.effects_applied = true;
                self.stock_out = stock_out.clone();
            }
            InvoiceEvent::PaymentRecorded {
                payment,
                amount_paid,
                status,
                ..
            } => {
                self.payments.push(payment.clone());
                self.amount_paid = *amount_paid;
                self.status = *status;
            }
            InvoiceEvent::Cancelled { .. } => {
                self.status = InvoiceStatus::Cancelled;
                self.effects_applied = false;
            }
            InvoiceEvent::Deleted { .. } => {
                self.deleted = true;
                self.effects_applied = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::UpdateInvoice(cmd) => self.handle_update(cmd),
            InvoiceCommand::SendInvoice(cmd) => self.handle_send(cmd),
            InvoiceCommand::RecordPayment(cmd) => self.handle_payment(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::DeleteInvoice(cmd) => self.handle_delete(cmd),
        }
    }
}

fn validate_content(
    issue_date: NaiveDate,
    due_date: NaiveDate,
    lines: &[InvoiceLine],
) -> Result<DocumentTotals, DomainError> {
    if due_date < issue_date {
        return Err(DomainError::validation("due_date cannot be before issue_date"));
    }
    let totals = DocumentTotals::from_lines(lines)?;
    if !totals.total.is_positive() {
        return Err(DomainError::validation("invoice total must be positive"));
    }
    Ok(totals)
}

fn clean_notes(notes: &Option<String>) -> Option<String> {
    kedai_core::validate::optional(notes.as_deref())
}

impl Invoice {
    fn ensure_existing(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        let number = kedai_core::validate::required("number", &cmd.number)?;
        let totals = validate_content(cmd.issue_date, cmd.due_date, &cmd.lines)?;

        Ok(vec![InvoiceEvent::Created {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            number,
            customer_id: cmd.customer_id,
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            lines: cmd.lines.clone(),
            notes: clean_notes(&cmd.notes),
            totals,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_update(&self, cmd: &UpdateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invariant(format!(
                "only DRAFT invoices can be edited (status is {})",
                self.status.as_str()
            )));
        }
        let totals = validate_content(cmd.issue_date, cmd.due_date, &cmd.lines)?;

        Ok(vec![InvoiceEvent::Updated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            customer_id: cmd.customer_id,
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            lines: cmd.lines.clone(),
            notes: clean_notes(&cmd.notes),
            totals,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_send(&self, cmd: &SendInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invariant(format!(
                "only DRAFT invoices can be sent (status is {})",
                self.status.as_str()
            )));
        }
        let Some(customer_id) = self.customer_id else {
            return Err(DomainError::invariant("invoice has no customer"));
        };
        validate_stock_out(&self.lines, &cmd.stock_out)?;

        Ok(vec![InvoiceEvent::Sent {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            number: self.number.clone(),
            customer_id,
            lines: self.lines.clone(),
            totals: self.totals,
            stock_out: cmd.stock_out.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_payment(&self, cmd: &RecordPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        if !matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Partial) {
            return Err(DomainError::invariant(format!(
                "cannot record payment on a {} invoice",
                self.status.as_str()
            )));
        }
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.payments.iter().any(|p| p.payment_id == cmd.payment_id) {
            return Err(DomainError::conflict("payment already recorded"));
        }

        let amount_paid = self.amount_paid.checked_add(cmd.amount)?;
        if amount_paid > self.totals.total {
            return Err(DomainError::invariant(format!(
                "payment exceeds balance due of {}",
                self.balance_due()
            )));
        }
        let status = if amount_paid == self.totals.total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        };

        Ok(vec![InvoiceEvent::PaymentRecorded {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                reference: kedai_core::validate::optional(cmd.reference.as_deref()),
                paid_at: cmd.paid_at,
            },
            amount_paid,
            status,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        match self.status {
            InvoiceStatus::Draft | InvoiceStatus::Sent if self.payments.is_empty() => {}
            InvoiceStatus::Cancelled => {
                return Err(DomainError::conflict("invoice is already cancelled"));
            }
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot cancel a {} invoice with payments",
                    other.as_str()
                )));
            }
        }

        Ok(vec![InvoiceEvent::Cancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason: kedai_core::validate::optional(cmd.reason.as_deref()),
            reverse_effects: self.effects_applied,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_delete(&self, cmd: &DeleteInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        if !self.payments.is_empty() {
            return Err(DomainError::invariant(
                "invoices with recorded payments cannot be deleted",
            ));
        }

        Ok(vec![InvoiceEvent::Deleted {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reverse_effects: self.effects_applied,
            occurred_at: cmd.occurred_at,
        }])
    }
}
