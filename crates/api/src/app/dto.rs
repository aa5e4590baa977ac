use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use kedai_accounting::{AccountKind, JournalLine};
use kedai_auth::Role;
use kedai_core::{Address, BasisPoints, Money};
use kedai_customers::{ContactInfo, Customer, TaxIdentity};
use kedai_invoicing::{Invoice, InvoiceStatus, PaymentMethod};
use kedai_products::{Product, StockReason};
use kedai_sales::{OrderType, PosOrder, Receipt};

// -------------------------
// Request DTOs
// -------------------------

/// Sign-up: a new company and its first owner.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub company_name: String,
    pub owner_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub registration_number: Option<String>,
    pub tin: Option<String>,
    pub address: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub struct TacRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TacVerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

/// Body of suspend, cancel and void calls. The whole body is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub tax: TaxIdentity,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhatsappQuery {
    pub message: Option<String>,
}

fn default_unit() -> String {
    "pcs".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub unit_price: Money,
    #[serde(default)]
    pub cost_price: Money,
    #[serde(default)]
    pub tax_rate: BasisPoints,
    pub classification_code: Option<String>,
    #[serde(default)]
    pub low_stock_threshold: i64,
    #[serde(default = "default_true")]
    pub track_stock: bool,
    #[serde(default)]
    pub initial_stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
    pub reason: Option<StockReason>,
    pub reference: Option<String>,
}

/// A document line as clients send it. Line numbers are assigned in order;
/// for catalog lines, missing description, price, tax rate and
/// classification come from the product.
#[derive(Debug, Clone, Deserialize)]
pub struct LineRequest {
    pub product_id: Option<String>,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: Option<Money>,
    #[serde(default)]
    pub discount_rate: BasisPoints,
    pub tax_rate: Option<BasisPoints>,
    pub classification_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub customer_id: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub lines: Vec<LineRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// `PATCH /invoices/:id/status`.
#[derive(Debug, Deserialize)]
pub struct InvoiceStatusRequest {
    pub status: InvoiceStatus,
    pub reason: Option<String>,
    /// For `PAID`: how the outstanding balance was settled.
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptRequest {
    pub customer_id: Option<String>,
    pub lines: Vec<LineRequest>,
    pub payment_method: PaymentMethod,
    pub amount_tendered: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrderRequest {
    pub order_type: OrderType,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Option<String>,
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price: Option<Money>,
    pub tax_rate: Option<BasisPoints>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
    pub amount_tendered: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
}

#[derive(Debug, Deserialize)]
pub struct JournalEntryRequest {
    pub description: String,
    pub source: Option<String>,
    pub lines: Vec<JournalLine>,
}

#[derive(Debug, Deserialize)]
pub struct SubmittedRequest {
    pub submission_uid: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidationResultRequest {
    pub valid: bool,
    pub uuid: Option<String>,
    pub long_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelDocumentRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn invoice_to_json(invoice: &Invoice) -> JsonValue {
    json!({
        "invoice_id": invoice.id_typed().to_string(),
        "number": invoice.number(),
        "customer_id": invoice.customer_id().map(|c| c.to_string()),
        "issue_date": invoice.issue_date(),
        "due_date": invoice.due_date(),
        "lines": invoice.lines(),
        "notes": invoice.notes(),
        "totals": invoice.totals(),
        "payments": invoice.payments(),
        "amount_paid": invoice.amount_paid(),
        "balance_due": invoice.balance_due(),
        "status": invoice.status(),
    })
}

pub fn receipt_to_json(receipt: &Receipt) -> JsonValue {
    json!({
        "receipt_id": receipt.id_typed().to_string(),
        "number": receipt.number(),
        "lines": receipt.lines(),
        "totals": receipt.totals(),
        "payment_method": receipt.payment_method(),
        "settlement": receipt.settlement(),
        "status": receipt.status(),
    })
}

pub fn order_to_json(order: &PosOrder) -> JsonValue {
    json!({
        "order_id": order.id_typed().to_string(),
        "number": order.number(),
        "order_type": order.order_type(),
        "items": order.items(),
        "totals": order.totals(),
        "status": order.status(),
        "receipt_id": order.receipt_id().map(|r| r.to_string()),
    })
}

pub fn customer_to_json(customer: &Customer) -> JsonValue {
    json!({
        "customer_id": customer.id_typed().to_string(),
        "name": customer.name(),
        "contact": customer.contact(),
        "tax": customer.tax(),
        "notes": customer.notes(),
        "status": customer.status(),
    })
}

pub fn product_to_json(product: &Product) -> JsonValue {
    json!({
        "product_id": product.id_typed().to_string(),
        "details": product.details(),
        "track_stock": product.tracks_stock(),
        "stock": product.stock(),
        "status": product.status(),
    })
}
