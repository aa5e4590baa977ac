//! CSV exports of the read models.
//!
//! Amounts are plain decimals (`1234.50`) so spreadsheets parse them as
//! numbers; dates are ISO 8601.

mod csv;

pub use csv::CsvWriter;

use std::collections::HashMap;

use kedai_core::Money;
use kedai_customers::{CustomerId, CustomerStatus};
use kedai_products::ProductStatus;

use crate::projections::{
    AccountBalance, CustomerReadModel, InvoiceReadModel, JournalEntryReadModel, ProductReadModel,
};

pub const CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// `-12.05` style decimal of an amount in sen.
pub fn decimal(amount: Money) -> String {
    let sen = amount.sen();
    let sign = if sen < 0 { "-" } else { "" };
    let abs = sen.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

pub fn invoices_csv(invoices: &[InvoiceReadModel], customers: &[CustomerReadModel]) -> String {
    let names: HashMap<CustomerId, &str> = customers
        .iter()
        .map(|c| (c.customer_id, c.details.name.as_str()))
        .collect();

    let mut w = CsvWriter::with_header(&[
        "number",
        "customer",
        "issue_date",
        "due_date",
        "status",
        "subtotal",
        "discount",
        "tax",
        "total",
        "paid",
        "balance_due",
    ]);
    for inv in invoices {
        w.write_row([
            inv.number.clone(),
            names.get(&inv.customer_id).copied().unwrap_or_default().to_string(),
            inv.issue_date.to_string(),
            inv.due_date.to_string(),
            inv.status.as_str().to_string(),
            decimal(inv.totals.subtotal),
            decimal(inv.totals.discount_total),
            decimal(inv.totals.tax_total),
            decimal(inv.totals.total),
            decimal(inv.amount_paid),
            decimal(inv.balance_due),
        ]);
    }
    w.finish()
}

pub fn customers_csv(customers: &[CustomerReadModel]) -> String {
    let mut w = CsvWriter::with_header(&["name", "email", "phone", "tin", "city", "state", "status"]);
    for c in customers {
        let contact = &c.details.contact;
        let address = contact.address.as_ref();
        w.write_row([
            c.details.name.as_str(),
            opt(contact.email.as_deref()),
            opt(contact.phone.as_deref()),
            opt(c.details.tax.tin.as_deref()),
            address.map(|a| a.city.as_str()).unwrap_or(""),
            address.map(|a| a.state.as_str()).unwrap_or(""),
            match c.status {
                CustomerStatus::Active => "active",
                CustomerStatus::Archived => "archived",
            },
        ]);
    }
    w.finish()
}

pub fn products_csv(products: &[ProductReadModel]) -> String {
    let mut w = CsvWriter::with_header(&[
        "sku",
        "name",
        "unit",
        "unit_price",
        "cost_price",
        "tax_rate_bps",
        "stock",
        "low_stock_threshold",
        "status",
    ]);
    for p in products {
        let d = &p.details;
        w.write_row([
            d.sku.clone(),
            d.name.clone(),
            d.unit.clone(),
            decimal(d.unit_price),
            decimal(d.cost_price),
            d.tax_rate.bps().to_string(),
            if p.track_stock { p.stock.to_string() } else { String::new() },
            d.low_stock_threshold.to_string(),
            match p.status {
                ProductStatus::Active => "active".to_string(),
                ProductStatus::Archived => "archived".to_string(),
            },
        ]);
    }
    w.finish()
}

/// One row per journal line, entries in the order given.
pub fn journal_csv(entries: &[JournalEntryReadModel], accounts: &[AccountBalance]) -> String {
    let names: HashMap<&str, &str> = accounts
        .iter()
        .map(|a| (a.account_code.as_str(), a.account_name.as_str()))
        .collect();

    let mut w = CsvWriter::with_header(&[
        "posted_at",
        "entry_id",
        "description",
        "source",
        "account_code",
        "account_name",
        "debit",
        "credit",
    ]);
    for entry in entries {
        for line in &entry.lines {
            let amount = decimal(line.amount);
            let (debit, credit) = if line.is_debit {
                (amount, String::new())
            } else {
                (String::new(), amount)
            };
            w.write_row([
                entry.posted_at.to_rfc3339(),
                entry.entry_id.to_string(),
                entry.description.clone(),
                entry.source.clone().unwrap_or_default(),
                line.account_code.clone(),
                names.get(line.account_code.as_str()).copied().unwrap_or_default().to_string(),
                debit,
                credit,
            ]);
        }
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use kedai_accounting::{AccountKind, JournalLine};
    use kedai_core::AggregateId;
    use kedai_customers::CustomerDetails;
    use kedai_invoicing::{DocumentTotals, InvoiceId, InvoiceStatus};
    use uuid::Uuid;

    #[test]
    fn decimals_keep_sign_and_two_places() {
        assert_eq!(decimal(Money::from_sen(123_450)), "1234.50");
        assert_eq!(decimal(Money::from_sen(-5)), "-0.05");
        assert_eq!(decimal(Money::zero()), "0.00");
    }

    #[test]
    fn invoice_rows_carry_customer_names() {
        let customer_id = CustomerId::new(AggregateId::from_uuid(Uuid::now_v7()));
        let at = Utc::now();
        let customer = CustomerReadModel {
            customer_id,
            details: CustomerDetails {
                name: "Syarikat Maju, Sdn Bhd".to_string(),
                ..Default::default()
            },
            status: CustomerStatus::Active,
            created_at: at,
            updated_at: at,
        };
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let invoice = InvoiceReadModel {
            invoice_id: InvoiceId::new(AggregateId::from_uuid(Uuid::now_v7())),
            number: "INV-000007".to_string(),
            customer_id,
            issue_date: day,
            due_date: day,
            lines: Vec::new(),
            notes: None,
            totals: DocumentTotals {
                subtotal: Money::from_sen(10_000),
                discount_total: Money::zero(),
                tax_total: Money::from_sen(600),
                total: Money::from_sen(10_600),
            },
            payments: Vec::new(),
            amount_paid: Money::zero(),
            balance_due: Money::from_sen(10_600),
            status: InvoiceStatus::Sent,
            created_at: at,
            sent_at: Some(at),
            updated_at: at,
        };

        let csv = invoices_csv(&[invoice], &[customer]);
        let rows: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(
            rows[1],
            "INV-000007,\"Syarikat Maju, Sdn Bhd\",2026-03-01,2026-03-01,SENT,100.00,0.00,6.00,106.00,0.00,106.00"
        );
    }

    #[test]
    fn journal_splits_debit_and_credit_columns() {
        let entry = JournalEntryReadModel {
            entry_id: Uuid::nil(),
            description: "Cash sale".to_string(),
            source: Some("RCT-000001".to_string()),
            lines: vec![
                JournalLine {
                    account_code: "1000".to_string(),
                    amount: Money::from_sen(500),
                    is_debit: true,
                },
                JournalLine {
                    account_code: "4000".to_string(),
                    amount: Money::from_sen(500),
                    is_debit: false,
                },
            ],
            total: Money::from_sen(500),
            posted_at: Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).unwrap(),
        };
        let cash = AccountBalance {
            account_code: "1000".to_string(),
            account_name: "Cash on Hand".to_string(),
            kind: AccountKind::Asset,
            debits: Money::zero(),
            credits: Money::zero(),
            balance: Money::zero(),
        };

        let csv = journal_csv(&[entry], &[cash]);
        let rows: Vec<&str> = csv.split("\r\n").filter(|r| !r.is_empty()).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].ends_with("1000,Cash on Hand,5.00,"));
        assert!(rows[2].ends_with("4000,,,5.00"));
    }
}
