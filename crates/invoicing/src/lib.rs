//! Invoicing domain module (event-sourced).
//!
//! Business rules for invoices, their line math and payments, plus the
//! MyInvois e-invoice readiness check and submission tracking. Pure domain
//! logic: no IO, no HTTP, no storage.

pub mod einvoice;
pub mod invoice;
pub mod line;

pub use einvoice::{
    CancelDocument, DocumentStatus, EInvoiceCommand, EInvoiceDocument, EInvoiceDocumentId,
    EInvoiceEvent, IssueScope, MarkSubmitted, PrepareDocument, Readiness, ReadinessIssue,
    RecordValidation, Severity, build_payload, check_readiness,
};
pub use invoice::{
    CancelInvoice, CreateInvoice, DeleteInvoice, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId,
    InvoiceStatus, Payment, PaymentId, PaymentMethod, RecordPayment, SendInvoice, UpdateInvoice,
};
pub use line::{
    DocumentTotals, InvoiceLine, LineAmounts, LineItem, StockOut, product_quantities,
    validate_stock_out,
};
