//! Document line math shared by invoices, receipts and POS orders.

use serde::{Deserialize, Serialize};

use kedai_core::{BasisPoints, DomainError, DomainResult, Money};
use kedai_products::ProductId;

/// One priced line of a sales document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_no: u32,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    #[serde(default)]
    pub discount_rate: BasisPoints,
    #[serde(default)]
    pub tax_rate: BasisPoints,
    #[serde(default)]
    pub classification_code: Option<String>,
}

pub type InvoiceLine = LineItem;

/// Computed amounts of one line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub gross: Money,
    pub discount: Money,
    pub net: Money,
    pub tax: Money,
    pub total: Money,
}

impl LineItem {
    pub fn validate(&self) -> DomainResult<()> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "line {}: description is required",
                self.line_no
            )));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "line {}: quantity must be positive",
                self.line_no
            )));
        }
        if self.unit_price.is_negative() {
            return Err(DomainError::validation(format!(
                "line {}: unit_price cannot be negative",
                self.line_no
            )));
        }
        self.discount_rate.validate_percent("discount_rate")?;
        self.tax_rate.validate_percent("tax_rate")?;
        Ok(())
    }

    /// gross = qty x price, discount and tax rounded half-up, tax on the
    /// discounted amount.
    pub fn amounts(&self) -> DomainResult<LineAmounts> {
        let gross = self.unit_price.times(self.quantity)?;
        let discount = gross.apply_rate(self.discount_rate);
        let net = gross.checked_sub(discount)?;
        let tax = net.apply_rate(self.tax_rate);
        let total = net.checked_add(tax)?;
        Ok(LineAmounts {
            gross,
            discount,
            net,
            tax,
            total,
        })
    }
}

/// Totals over a set of lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    /// Sum of line net amounts (after discount, before tax).
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub total: Money,
}

impl DocumentTotals {
    /// Validates every line (non-empty, unique line numbers) and sums them.
    pub fn from_lines(lines: &[LineItem]) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation("at least one line is required"));
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut totals = DocumentTotals::default();
        for line in lines {
            if !seen.insert(line.line_no) {
                return Err(DomainError::validation(format!(
                    "duplicate line_no {}",
                    line.line_no
                )));
            }
            line.validate()?;
            let amounts = line.amounts()?;
            totals.subtotal = totals.subtotal.checked_add(amounts.net)?;
            totals.discount_total = totals.discount_total.checked_add(amounts.discount)?;
            totals.tax_total = totals.tax_total.checked_add(amounts.tax)?;
            totals.total = totals.total.checked_add(amounts.total)?;
        }
        Ok(totals)
    }
}

/// Quantity per product, in order of first appearance. Lines without a
/// product are skipped.
pub fn product_quantities(lines: &[LineItem]) -> Vec<(ProductId, i64)> {
    let mut out: Vec<(ProductId, i64)> = Vec::new();
    for line in lines {
        let Some(product_id) = line.product_id else {
            continue;
        };
        match out.iter_mut().find(|(id, _)| *id == product_id) {
            Some((_, qty)) => *qty += line.quantity,
            None => out.push((product_id, line.quantity)),
        }
    }
    out
}

/// Stock actually taken out for a product when a document was sent or
/// issued. Reversals put back exactly these quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOut {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Each recorded quantity must be positive and covered by the document's
/// lines for that product.
pub fn validate_stock_out(lines: &[LineItem], stock_out: &[StockOut]) -> DomainResult<()> {
    let sold = product_quantities(lines);
    for (idx, entry) in stock_out.iter().enumerate() {
        if entry.quantity <= 0 {
            return Err(DomainError::validation(format!("stock_out[{idx}] quantity must be positive")));
        }
        let on_lines = sold
            .iter()
            .find(|(id, _)| *id == entry.product_id)
            .map_or(0, |(_, qty)| *qty);
        let recorded: i64 = stock_out
            .iter()
            .filter(|s| s.product_id == entry.product_id)
            .map(|s| s.quantity)
            .sum();
        if recorded > on_lines {
            return Err(DomainError::validation(format!(
                "stock_out[{idx}] exceeds the quantity on the lines"
            )));
        }
    }
    Ok(())
}
