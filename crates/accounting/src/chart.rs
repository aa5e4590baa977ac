//! Chart of accounts.

use serde::{Deserialize, Serialize};

use kedai_core::{DomainError, DomainResult, Money};

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }

    /// Balance on the normal side: positive when the account holds what
    /// its kind expects.
    pub fn balance(&self, debits: Money, credits: Money) -> Money {
        if self.is_debit_normal() {
            debits - credits
        } else {
            credits - debits
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
}

impl Account {
    pub fn new(code: &str, name: &str, kind: AccountKind) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            kind,
        }
    }

    /// Four digits, the leading digit matching the kind (1 asset,
    /// 2 liability, 3 equity, 4 revenue, 5-9 expense).
    pub fn validated(&self) -> DomainResult<Self> {
        let code = self.code.trim();
        if code.len() != 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "account code must be 4 digits: {code}"
            )));
        }
        let expected = match code.as_bytes()[0] {
            b'1' => Some(AccountKind::Asset),
            b'2' => Some(AccountKind::Liability),
            b'3' => Some(AccountKind::Equity),
            b'4' => Some(AccountKind::Revenue),
            b'5'..=b'9' => Some(AccountKind::Expense),
            _ => None,
        };
        if expected != Some(self.kind) {
            return Err(DomainError::validation(format!(
                "account {code} does not fit kind {:?}",
                self.kind
            )));
        }
        let name = kedai_core::validate::required("name", &self.name)?;
        Ok(Self {
            code: code.to_string(),
            name,
            kind: self.kind,
        })
    }
}

/// Codes of the accounts the posting rules use.
pub mod codes {
    pub const CASH: &str = "1000";
    pub const BANK: &str = "1010";
    pub const ACCOUNTS_RECEIVABLE: &str = "1200";
    pub const INVENTORY: &str = "1300";
    pub const SST_PAYABLE: &str = "2200";
    pub const OWNER_EQUITY: &str = "3000";
    pub const SALES: &str = "4000";
    pub const ROUNDING: &str = "4900";
    pub const COST_OF_GOODS_SOLD: &str = "5000";

    /// Cash tenders land in the till, everything else in the bank.
    pub fn tender_account(is_cash: bool) -> &'static str {
        if is_cash { CASH } else { BANK }
    }
}

/// Default Malaysian SME chart.
pub fn default_chart() -> Vec<Account> {
    use AccountKind::*;
    vec![
        Account::new(codes::CASH, "Cash on Hand", Asset),
        Account::new(codes::BANK, "Bank", Asset),
        Account::new(codes::ACCOUNTS_RECEIVABLE, "Accounts Receivable", Asset),
        Account::new(codes::INVENTORY, "Inventory", Asset),
        Account::new(codes::SST_PAYABLE, "SST Payable", Liability),
        Account::new(codes::OWNER_EQUITY, "Owner's Equity", Equity),
        Account::new(codes::SALES, "Sales Revenue", Revenue),
        // Cash rounding nets out around zero; kept with revenue.
        Account::new(codes::ROUNDING, "Rounding Adjustment", Revenue),
        Account::new(codes::COST_OF_GOODS_SOLD, "Cost of Goods Sold", Expense),
    ]
}
