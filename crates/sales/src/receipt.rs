use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::{Aggregate, AggregateRoot, DomainError, DomainResult, Money, TenantId};
use kedai_customers::CustomerId;
use kedai_events::Event;
use kedai_invoicing::{DocumentTotals, LineItem, PaymentMethod, StockOut, validate_stock_out};

use crate::pos_order::PosOrderId;

kedai_core::typed_id!(ReceiptId, "ReceiptId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    Issued,
    Voided,
}

/// How a receipt total is settled at the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Amount actually collected (cash totals rounded to 5 sen).
    pub payable: Money,
    /// `payable - total`; non-zero only for cash.
    pub rounding: Money,
    pub amount_tendered: Money,
    pub change: Money,
}

/// Computes what the customer pays for `total`.
///
/// Cash is rounded to the nearest 5 sen and needs a tender covering the
/// rounded amount. Other methods collect the exact total.
pub fn settle(total: Money, method: PaymentMethod, tendered: Option<Money>) -> DomainResult<Settlement> {
    if !method.is_cash() {
        return Ok(Settlement {
            payable: total,
            rounding: Money::zero(),
            amount_tendered: total,
            change: Money::zero(),
        });
    }

    let payable = total.round_to_5_sen();
    let Some(tendered) = tendered else {
        return Err(DomainError::validation("amount_tendered is required for cash"));
    };
    if tendered < payable {
        return Err(DomainError::validation(format!(
            "amount tendered {tendered} is less than {payable}"
        )));
    }
    Ok(Settlement {
        payable,
        rounding: payable - total,
        amount_tendered: tendered,
        change: tendered - payable,
    })
}

/// Aggregate root: Receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    id: ReceiptId,
    tenant_id: Option<TenantId>,
    number: String,
    customer_id: Option<CustomerId>,
    pos_order_id: Option<PosOrderId>,
    lines: Vec<LineItem>,
    totals: DocumentTotals,
    payment_method: PaymentMethod,
    settlement: Option<Settlement>,
    stock_out: Vec<StockOut>,
    status: ReceiptStatus,
    issued_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Receipt {
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            customer_id: None,
            pos_order_id: None,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            payment_method: PaymentMethod::Cash,
            settlement: None,
            stock_out: Vec::new(),
            status: ReceiptStatus::Issued,
            issued_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn totals(&self) -> DocumentTotals {
        self.totals
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn settlement(&self) -> Option<Settlement> {
        self.settlement
    }

    /// Stock taken out when the receipt was issued.
    pub fn stock_out(&self) -> &[StockOut] {
        &self.stock_out
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Receipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceipt {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub number: String,
    pub customer_id: Option<CustomerId>,
    pub pos_order_id: Option<PosOrderId>,
    pub lines: Vec<LineItem>,
    pub payment_method: PaymentMethod,
    pub amount_tendered: Option<Money>,
    #[serde(default)]
    pub stock_out: Vec<StockOut>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidReceipt {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    Issue(IssueReceipt),
    Void(VoidReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    Issued {
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        number: String,
        customer_id: Option<CustomerId>,
        pos_order_id: Option<PosOrderId>,
        lines: Vec<LineItem>,
        totals: DocumentTotals,
        payment_method: PaymentMethod,
        settlement: Settlement,
        #[serde(default)]
        stock_out: Vec<StockOut>,
        occurred_at: DateTime<Utc>,
    },
    Voided {
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl ReceiptEvent {
    pub fn receipt_id(&self) -> ReceiptId {
        match self {
            ReceiptEvent::Issued { receipt_id, .. }
            | ReceiptEvent::Voided { receipt_id, .. } => *receipt_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            ReceiptEvent::Issued { tenant_id, .. } | ReceiptEvent::Voided { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::Issued { .. } => "sales.receipt.issued",
            ReceiptEvent::Voided { .. } => "sales.receipt.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::Issued { occurred_at, .. } | ReceiptEvent::Voided { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Receipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::Issued {
                tenant_id,
                receipt_id,
                number,
                customer_id,
                pos_order_id,
                lines,
                totals,
                payment_method,
                settlement,
                stock_out,
                occurred_at,
            } => {
                self.id = *receipt_id;
                self.tenant_id = Some(*tenant_id);
                self.number = number.clone();
                self.customer_id = *customer_id;
                self.pos_order_id = *pos_order_id;
                self.lines = lines.clone();
                self.totals = *totals;
                self.payment_method = *payment_method;
                self.settlement = Some(*settlement);
                self.stock_out = stock_out.clone();
                self.issued_at = Some(*occurred_at);
                self.status = ReceiptStatus::Issued;
                self.created = true;
            }
            ReceiptEvent::Voided { .. } => self.status = ReceiptStatus::Voided,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::Issue(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("receipt already exists"));
                }
                let number = kedai_core::validate::required("number", &cmd.number)?;
                let totals = DocumentTotals::from_lines(&cmd.lines)?;
                let settlement = settle(totals.total, cmd.payment_method, cmd.amount_tendered)?;
                validate_stock_out(&cmd.lines, &cmd.stock_out)?;

                Ok(vec![ReceiptEvent::Issued {
                    tenant_id: cmd.tenant_id,
                    receipt_id: cmd.receipt_id,
                    number,
                    customer_id: cmd.customer_id,
                    pos_order_id: cmd.pos_order_id,
                    lines: cmd.lines.clone(),
                    totals,
                    payment_method: cmd.payment_method,
                    settlement,
                    stock_out: cmd.stock_out.clone(),
                    occurred_at: cmd.issued_at,
                }])
            }
            ReceiptCommand::Void(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) {
                    return Err(DomainError::invariant("tenant mismatch"));
                }
                if self.status == ReceiptStatus::Voided {
                    return Err(DomainError::conflict("receipt is already voided"));
                }
                Ok(vec![ReceiptEvent::Voided {
                    tenant_id: cmd.tenant_id,
                    receipt_id: cmd.receipt_id,
                    reason: kedai_core::validate::optional(cmd.reason.as_deref()),
                    occurred_at: cmd.occurred_at,
                }])
            }
        }
    }
}
