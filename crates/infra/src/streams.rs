//! Stream naming for every aggregate the backend persists.

use kedai_core::{Aggregate, AggregateId, DomainError, TenantId, UserId};

use kedai_accounting::{Ledger, LedgerId};
use kedai_auth::User;
use kedai_company::Company;
use kedai_customers::{Customer, CustomerId};
use kedai_invoicing::{EInvoiceDocument, EInvoiceDocumentId, Invoice, InvoiceId};
use kedai_products::{Product, ProductId};
use kedai_sales::{PosOrder, PosOrderId, Receipt, ReceiptId};

/// An aggregate with a fixed stream type and a blank starting state.
pub trait StreamAggregate: Aggregate<Error = DomainError> + Sized + Send {
    /// Prefix shared by the aggregate's event types, stored per stream.
    const AGGREGATE_TYPE: &'static str;

    fn blank(tenant_id: TenantId, aggregate_id: AggregateId) -> Self;
}

impl StreamAggregate for Company {
    const AGGREGATE_TYPE: &'static str = "company.profile";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        Company::empty(aggregate_id)
    }
}

impl StreamAggregate for User {
    const AGGREGATE_TYPE: &'static str = "auth.user";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        User::empty(UserId::from_uuid(*aggregate_id.as_uuid()))
    }
}

impl StreamAggregate for Customer {
    const AGGREGATE_TYPE: &'static str = "customers.customer";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        Customer::empty(CustomerId::new(aggregate_id))
    }
}

impl StreamAggregate for Product {
    const AGGREGATE_TYPE: &'static str = "products.product";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        Product::empty(ProductId::new(aggregate_id))
    }
}

impl StreamAggregate for Invoice {
    const AGGREGATE_TYPE: &'static str = "invoicing.invoice";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        Invoice::empty(InvoiceId::new(aggregate_id))
    }
}

impl StreamAggregate for EInvoiceDocument {
    const AGGREGATE_TYPE: &'static str = "invoicing.einvoice";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        EInvoiceDocument::empty(EInvoiceDocumentId::new(aggregate_id))
    }
}

impl StreamAggregate for Receipt {
    const AGGREGATE_TYPE: &'static str = "sales.receipt";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        Receipt::empty(ReceiptId::new(aggregate_id))
    }
}

impl StreamAggregate for PosOrder {
    const AGGREGATE_TYPE: &'static str = "sales.pos_order";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        PosOrder::empty(PosOrderId::new(aggregate_id))
    }
}

impl StreamAggregate for Ledger {
    const AGGREGATE_TYPE: &'static str = "accounting.ledger";

    fn blank(_tenant_id: TenantId, aggregate_id: AggregateId) -> Self {
        Ledger::empty(LedgerId::new(aggregate_id))
    }
}
