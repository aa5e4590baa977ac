//! Dashboard aggregation over the read models.
//!
//! A summary is computed per tenant and month from the invoice, receipt,
//! product and customer read models, then cached. Projecting an event of
//! one of those streams invalidates the tenant's cached summaries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use serde_json::Value as JsonValue;

use kedai_core::{Money, TenantId};
use kedai_customers::{Customer, CustomerId};
use kedai_events::EventEnvelope;
use kedai_invoicing::{Invoice, InvoiceStatus, LineItem};
use kedai_products::{Product, ProductId, ProductStatus};
use kedai_sales::{Receipt, ReceiptStatus};

use crate::cache::TaggedCache;
use crate::projections::{CustomerReadModel, InvoiceReadModel, ProductReadModel, ReadModels, ReceiptReadModel};
use crate::streams::StreamAggregate;

const TOP_N: usize = 5;
const SERIES_MONTHS: u32 = 12;

const TAG_INVOICES: &str = "invoices";
const TAG_RECEIPTS: &str = "receipts";
const TAG_PRODUCTS: &str = "products";
const TAG_CUSTOMERS: &str = "customers";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopCustomer {
    pub customer_id: CustomerId,
    pub name: String,
    pub invoiced: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopProduct {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub stock: i64,
    pub low_stock_threshold: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlySales {
    /// `YYYY-MM`.
    pub month: String,
    pub invoices: Money,
    pub receipts: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub as_of: NaiveDate,
    pub month: String,
    /// Billed invoices issued this month plus non-void receipts.
    pub sales_this_month: Money,
    pub invoiced_this_month: Money,
    pub receipts_this_month: Money,
    pub payments_this_month: Money,
    pub outstanding_receivables: Money,
    pub overdue_count: usize,
    pub overdue_amount: Money,
    pub invoice_counts: BTreeMap<&'static str, usize>,
    /// Over the months of `monthly_sales`.
    pub top_customers: Vec<TopCustomer>,
    /// Over the months of `monthly_sales`.
    pub top_products: Vec<TopProduct>,
    pub low_stock: Vec<LowStockProduct>,
    /// Oldest first, ending with the current month.
    pub monthly_sales: Vec<MonthlySales>,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

fn add_quantities(lines: &[LineItem], sold: &mut HashMap<ProductId, (i64, String)>) {
    for line in lines {
        if let Some(product_id) = line.product_id {
            let entry = sold
                .entry(product_id)
                .or_insert_with(|| (0, line.description.clone()));
            entry.0 += line.quantity;
        }
    }
}

/// Pure aggregation of one tenant's read models as of `today`.
pub fn summarize(
    today: NaiveDate,
    invoices: &[InvoiceReadModel],
    receipts: &[ReceiptReadModel],
    products: &[ProductReadModel],
    customers: &[CustomerReadModel],
) -> DashboardSummary {
    let current = month_start(today);
    let first = current
        .checked_sub_months(Months::new(SERIES_MONTHS - 1))
        .unwrap_or(current);
    let in_window = |d: NaiveDate| d >= first && d <= today;

    let mut series: Vec<MonthlySales> = (0..SERIES_MONTHS)
        .filter_map(|i| first.checked_add_months(Months::new(i)))
        .map(|m| MonthlySales {
            month: month_key(m),
            invoices: Money::zero(),
            receipts: Money::zero(),
            total: Money::zero(),
        })
        .collect();
    let slot = |d: NaiveDate| {
        let key = month_key(d);
        series.iter().position(|m| m.month == key)
    };

    let mut invoice_counts: BTreeMap<&'static str, usize> = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Partial,
        InvoiceStatus::Paid,
        InvoiceStatus::Cancelled,
    ]
    .iter()
    .map(|s| (s.as_str(), 0))
    .collect();

    let mut invoiced_this_month = Money::zero();
    let mut payments_this_month = Money::zero();
    let mut outstanding = Money::zero();
    let mut overdue_count = 0;
    let mut overdue_amount = Money::zero();
    let mut by_customer: HashMap<CustomerId, Money> = HashMap::new();
    let mut sold: HashMap<ProductId, (i64, String)> = HashMap::new();
    let mut invoice_slots = Vec::new();

    for inv in invoices {
        *invoice_counts.entry(inv.status.as_str()).or_default() += 1;

        payments_this_month += inv
            .payments
            .iter()
            .filter(|p| same_month(p.paid_at.date_naive(), today))
            .map(|p| p.amount)
            .sum::<Money>();

        if matches!(inv.status, InvoiceStatus::Sent | InvoiceStatus::Partial) {
            outstanding += inv.balance_due;
        }
        if inv.is_overdue(today) {
            overdue_count += 1;
            overdue_amount += inv.balance_due;
        }

        if !inv.status.is_billed() {
            continue;
        }
        if same_month(inv.issue_date, today) {
            invoiced_this_month += inv.totals.total;
        }
        if in_window(inv.issue_date) {
            *by_customer.entry(inv.customer_id).or_default() += inv.totals.total;
            add_quantities(&inv.lines, &mut sold);
            if let Some(i) = slot(inv.issue_date) {
                invoice_slots.push((i, inv.totals.total));
            }
        }
    }

    let mut receipts_this_month = Money::zero();
    let mut receipt_slots = Vec::new();
    for rct in receipts.iter().filter(|r| r.status == ReceiptStatus::Issued) {
        let day = rct.issued_at.date_naive();
        if same_month(day, today) {
            receipts_this_month += rct.totals.total;
        }
        if in_window(day) {
            add_quantities(&rct.lines, &mut sold);
            if let Some(i) = slot(day) {
                receipt_slots.push((i, rct.totals.total));
            }
        }
    }

    for (i, amount) in invoice_slots {
        series[i].invoices += amount;
    }
    for (i, amount) in receipt_slots {
        series[i].receipts += amount;
    }
    for m in &mut series {
        m.total = m.invoices + m.receipts;
    }

    let names: HashMap<CustomerId, &str> = customers
        .iter()
        .map(|c| (c.customer_id, c.details.name.as_str()))
        .collect();
    let mut top_customers: Vec<TopCustomer> = by_customer
        .into_iter()
        .map(|(customer_id, invoiced)| TopCustomer {
            customer_id,
            name: names.get(&customer_id).map(|n| n.to_string()).unwrap_or_default(),
            invoiced,
        })
        .collect();
    top_customers.sort_by(|a, b| b.invoiced.cmp(&a.invoiced).then_with(|| a.name.cmp(&b.name)));
    top_customers.truncate(TOP_N);

    let catalog: HashMap<ProductId, &ProductReadModel> = products.iter().map(|p| (p.product_id, p)).collect();
    let mut top_products: Vec<TopProduct> = sold
        .into_iter()
        .map(|(product_id, (quantity, description))| TopProduct {
            product_id,
            name: catalog
                .get(&product_id)
                .map(|p| p.details.name.clone())
                .unwrap_or(description),
            quantity,
        })
        .collect();
    top_products.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.name.cmp(&b.name)));
    top_products.truncate(TOP_N);

    let mut low_stock: Vec<LowStockProduct> = products
        .iter()
        .filter(|p| p.status == ProductStatus::Active && p.is_low_stock())
        .map(|p| LowStockProduct {
            product_id: p.product_id,
            sku: p.details.sku.clone(),
            name: p.details.name.clone(),
            stock: p.stock,
            low_stock_threshold: p.details.low_stock_threshold,
        })
        .collect();
    low_stock.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.sku.cmp(&b.sku)));

    DashboardSummary {
        as_of: today,
        month: month_key(today),
        sales_this_month: invoiced_this_month + receipts_this_month,
        invoiced_this_month,
        receipts_this_month,
        payments_this_month,
        outstanding_receivables: outstanding,
        overdue_count,
        overdue_amount,
        invoice_counts,
        top_customers,
        top_products,
        low_stock,
        monthly_sales: series,
    }
}

/// Cached dashboard summaries over the shared read models.
pub struct Dashboard {
    read_models: ReadModels,
    cache: Arc<TaggedCache<NaiveDate, DashboardSummary>>,
}

impl Dashboard {
    pub fn new(read_models: ReadModels, ttl: Duration) -> Self {
        Self {
            read_models,
            cache: Arc::new(TaggedCache::new(ttl)),
        }
    }

    /// Summary for the month of `today`, from cache when still fresh.
    /// Keyed by day since overdue figures move with `today`.
    #[tracing::instrument(skip(self))]
    pub fn summary(&self, tenant_id: TenantId, today: NaiveDate) -> DashboardSummary {
        self.cache.get_or_insert_with(
            tenant_id,
            today,
            &[TAG_INVOICES, TAG_RECEIPTS, TAG_PRODUCTS, TAG_CUSTOMERS],
            || {
                summarize(
                    today,
                    &self.read_models.invoices.list(tenant_id),
                    &self.read_models.receipts.list(tenant_id),
                    &self.read_models.products.list(tenant_id),
                    &self.read_models.customers.list(tenant_id),
                )
            },
        )
    }

    /// Drops cached summaries the envelope may have changed. Call after the
    /// envelope has been projected.
    pub fn invalidate_for(&self, envelope: &EventEnvelope<JsonValue>) {
        let tag = match envelope.aggregate_type() {
            t if t == Invoice::AGGREGATE_TYPE => TAG_INVOICES,
            t if t == Receipt::AGGREGATE_TYPE => TAG_RECEIPTS,
            t if t == Product::AGGREGATE_TYPE => TAG_PRODUCTS,
            t if t == Customer::AGGREGATE_TYPE => TAG_CUSTOMERS,
            _ => return,
        };
        self.cache.invalidate(envelope.tenant_id(), tag);
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kedai_core::{AggregateId, BasisPoints};
    use kedai_customers::CustomerDetails;
    use kedai_invoicing::{DocumentTotals, InvoiceId, Payment, PaymentId, PaymentMethod};
    use kedai_customers::CustomerStatus;
    use kedai_products::ProductDetails;
    use kedai_sales::{ReceiptId, Settlement};
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn totals(sen: i64) -> DocumentTotals {
        DocumentTotals {
            subtotal: Money::from_sen(sen),
            discount_total: Money::zero(),
            tax_total: Money::zero(),
            total: Money::from_sen(sen),
        }
    }

    fn line(product_id: ProductId, qty: i64) -> LineItem {
        LineItem {
            line_no: 1,
            product_id: Some(product_id),
            description: "Kopi O".to_string(),
            quantity: qty,
            unit_price: Money::from_sen(100),
            discount_rate: BasisPoints::zero(),
            tax_rate: BasisPoints::zero(),
            classification_code: None,
        }
    }

    fn invoice(
        customer_id: CustomerId,
        issued: NaiveDate,
        due: NaiveDate,
        status: InvoiceStatus,
        total: i64,
        paid: i64,
    ) -> InvoiceReadModel {
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        InvoiceReadModel {
            invoice_id: InvoiceId::generate(),
            number: "INV-000001".to_string(),
            customer_id,
            issue_date: issued,
            due_date: due,
            lines: vec![],
            notes: None,
            totals: totals(total),
            payments: if paid > 0 {
                vec![Payment {
                    payment_id: PaymentId::generate(),
                    amount: Money::from_sen(paid),
                    method: PaymentMethod::BankTransfer,
                    reference: None,
                    paid_at: at,
                }]
            } else {
                vec![]
            },
            amount_paid: Money::from_sen(paid),
            balance_due: Money::from_sen(total - paid),
            status,
            created_at: at,
            sent_at: None,
            updated_at: at,
        }
    }

    fn receipt(product_id: ProductId, qty: i64, total: i64, status: ReceiptStatus, day: u32) -> ReceiptReadModel {
        ReceiptReadModel {
            receipt_id: ReceiptId::generate(),
            number: "RCT-000001".to_string(),
            customer_id: None,
            pos_order_id: None,
            lines: vec![line(product_id, qty)],
            totals: totals(total),
            payment_method: PaymentMethod::Card,
            settlement: Settlement {
                payable: Money::from_sen(total),
                rounding: Money::zero(),
                amount_tendered: Money::from_sen(total),
                change: Money::zero(),
            },
            status,
            void_reason: None,
            issued_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            voided_at: None,
        }
    }

    fn product(stock: i64, threshold: i64) -> ProductReadModel {
        let at = Utc::now();
        ProductReadModel {
            product_id: ProductId::new(AggregateId::from_uuid(Uuid::now_v7())),
            details: ProductDetails {
                sku: "KOPI-O".to_string(),
                name: "Kopi O".to_string(),
                description: None,
                unit: "cup".to_string(),
                unit_price: Money::from_sen(180),
                cost_price: Money::from_sen(60),
                tax_rate: BasisPoints::zero(),
                classification_code: None,
                low_stock_threshold: threshold,
            },
            track_stock: true,
            stock,
            status: ProductStatus::Active,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn month_figures_and_receivables() {
        let today = date(2026, 3, 20);
        let alpha = CustomerId::generate();
        let beta = CustomerId::generate();
        let kopi = product(3, 5);

        let invoices = vec![
            invoice(alpha, date(2026, 3, 2), date(2026, 3, 16), InvoiceStatus::Partial, 10_000, 4_000),
            invoice(beta, date(2026, 3, 5), date(2026, 4, 5), InvoiceStatus::Sent, 2_500, 0),
            invoice(beta, date(2026, 3, 6), date(2026, 4, 6), InvoiceStatus::Draft, 9_999, 0),
            invoice(alpha, date(2026, 1, 10), date(2026, 2, 10), InvoiceStatus::Paid, 1_000, 0),
        ];
        let receipts = vec![
            receipt(kopi.product_id, 4, 720, ReceiptStatus::Issued, 18),
            receipt(kopi.product_id, 9, 1_620, ReceiptStatus::Voided, 19),
        ];
        let customers = vec![CustomerReadModel {
            customer_id: alpha,
            details: CustomerDetails {
                name: "Alpha Trading".to_string(),
                ..Default::default()
            },
            status: CustomerStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }];

        let s = summarize(today, &invoices, &receipts, &[kopi.clone()], &customers);

        assert_eq!(s.invoiced_this_month, Money::from_sen(12_500));
        assert_eq!(s.receipts_this_month, Money::from_sen(720));
        assert_eq!(s.sales_this_month, Money::from_sen(13_220));
        assert_eq!(s.payments_this_month, Money::from_sen(4_000));
        assert_eq!(s.outstanding_receivables, Money::from_sen(8_500));
        assert_eq!((s.overdue_count, s.overdue_amount), (1, Money::from_sen(6_000)));
        assert_eq!(s.invoice_counts["DRAFT"], 1);
        assert_eq!(s.invoice_counts["CANCELLED"], 0);

        assert_eq!(s.top_customers[0].name, "Alpha Trading");
        assert_eq!(s.top_customers[0].invoiced, Money::from_sen(11_000));
        assert_eq!(s.top_products.len(), 1);
        assert_eq!((s.top_products[0].name.as_str(), s.top_products[0].quantity), ("Kopi O", 4));
        assert_eq!(s.low_stock.len(), 1);

        assert_eq!(s.monthly_sales.len(), 12);
        assert_eq!(s.monthly_sales[0].month, "2025-04");
        let march = s.monthly_sales.last().unwrap();
        assert_eq!((march.month.as_str(), march.total), ("2026-03", Money::from_sen(13_220)));
        assert_eq!(s.monthly_sales[9].invoices, Money::from_sen(1_000));
    }

    #[test]
    fn projected_events_invalidate_the_cached_summary() {
        let dashboard = Dashboard::new(ReadModels::in_memory(), Duration::from_secs(300));
        let tenant = TenantId::new();
        let today = date(2026, 3, 20);
        let before = dashboard.summary(tenant, today);
        assert_eq!(before.sales_this_month, Money::zero());
        assert_eq!(dashboard.cache.len(), 1);

        let envelope = |aggregate_type: &str| {
            EventEnvelope::new(Uuid::now_v7(), tenant, AggregateId::new(), aggregate_type, 1, JsonValue::Null)
        };
        dashboard.invalidate_for(&envelope("company.profile"));
        assert_eq!(dashboard.cache.len(), 1);

        dashboard.invalidate_for(&envelope(Invoice::AGGREGATE_TYPE));
        assert!(dashboard.cache.is_empty());
    }

    #[test]
    fn each_day_gets_its_own_summary() {
        let dashboard = Dashboard::new(ReadModels::in_memory(), Duration::from_secs(300));
        let tenant = TenantId::new();

        assert_eq!(dashboard.summary(tenant, date(2026, 3, 20)).as_of, date(2026, 3, 20));
        let next_day = dashboard.summary(tenant, date(2026, 3, 21));
        assert_eq!(next_day.as_of, date(2026, 3, 21));
        assert_eq!(next_day.month, dashboard.summary(tenant, date(2026, 3, 20)).month);
        assert_eq!(dashboard.cache.len(), 2);
    }
}
