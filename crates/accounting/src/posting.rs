//! Posting rules: the journal lines each sales event produces.
//!
//! Every function returns a balanced set of lines. Zero-amount lines are
//! left out, so an entry can come back empty (nothing to post).

use kedai_core::Money;

use crate::chart::codes;
use crate::ledger::JournalLine;

fn push(lines: &mut Vec<JournalLine>, line: JournalLine) {
    if line.amount.is_zero() {
        return;
    }
    if line.amount.is_negative() {
        lines.push(JournalLine {
            amount: line.amount.abs(),
            ..line.reversed()
        });
    } else {
        lines.push(line);
    }
}

/// Flips every line of an entry.
pub fn reverse(lines: &[JournalLine]) -> Vec<JournalLine> {
    lines.iter().map(JournalLine::reversed).collect()
}

/// Invoice sent: receivable for the total against sales and SST.
pub fn invoice_sent(net: Money, tax: Money) -> Vec<JournalLine> {
    let mut lines = Vec::new();
    push(&mut lines, JournalLine::debit(codes::ACCOUNTS_RECEIVABLE, net + tax));
    push(&mut lines, JournalLine::credit(codes::SALES, net));
    push(&mut lines, JournalLine::credit(codes::SST_PAYABLE, tax));
    lines
}

pub fn invoice_reversed(net: Money, tax: Money) -> Vec<JournalLine> {
    reverse(&invoice_sent(net, tax))
}

/// Stock leaving at cost.
pub fn cost_of_sales(cost: Money) -> Vec<JournalLine> {
    let mut lines = Vec::new();
    push(&mut lines, JournalLine::debit(codes::COST_OF_GOODS_SOLD, cost));
    push(&mut lines, JournalLine::credit(codes::INVENTORY, cost));
    lines
}

pub fn cost_of_sales_reversed(cost: Money) -> Vec<JournalLine> {
    reverse(&cost_of_sales(cost))
}

/// Customer payment against an invoice.
pub fn payment_received(amount: Money, is_cash: bool) -> Vec<JournalLine> {
    let mut lines = Vec::new();
    push(&mut lines, JournalLine::debit(codes::tender_account(is_cash), amount));
    push(&mut lines, JournalLine::credit(codes::ACCOUNTS_RECEIVABLE, amount));
    lines
}

/// Counter sale: the collected amount against sales, SST and the cash
/// rounding difference (`payable - total`).
pub fn receipt_issued(net: Money, tax: Money, rounding: Money, is_cash: bool) -> Vec<JournalLine> {
    let mut lines = Vec::new();
    push(
        &mut lines,
        JournalLine::debit(codes::tender_account(is_cash), net + tax + rounding),
    );
    push(&mut lines, JournalLine::credit(codes::SALES, net));
    push(&mut lines, JournalLine::credit(codes::SST_PAYABLE, tax));
    push(&mut lines, JournalLine::credit(codes::ROUNDING, rounding));
    lines
}

pub fn receipt_voided(net: Money, tax: Money, rounding: Money, is_cash: bool) -> Vec<JournalLine> {
    reverse(&receipt_issued(net, tax, rounding, is_cash))
}

/// Debits minus credits.
pub fn imbalance(lines: &[JournalLine]) -> Money {
    lines
        .iter()
        .map(|l| if l.is_debit { l.amount } else { -l.amount })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn find<'a>(lines: &'a [JournalLine], code: &str) -> &'a JournalLine {
        lines
            .iter()
            .find(|l| l.account_code == code)
            .unwrap_or_else(|| panic!("no line for {code}"))
    }

    #[test]
    fn invoice_sent_splits_revenue_and_tax() {
        let lines = invoice_sent(Money::from_sen(10_000), Money::from_sen(600));
        assert_eq!(lines.len(), 3);
        let ar = find(&lines, codes::ACCOUNTS_RECEIVABLE);
        assert!(ar.is_debit);
        assert_eq!(ar.amount, Money::from_sen(10_600));
        assert!(!find(&lines, codes::SST_PAYABLE).is_debit);
    }

    #[test]
    fn zero_tax_line_is_omitted() {
        let lines = invoice_sent(Money::from_sen(500), Money::zero());
        assert_eq!(lines.len(), 2);
        assert!(cost_of_sales(Money::zero()).is_empty());
    }

    #[test]
    fn negative_rounding_is_debited() {
        // total 10.02 collected as 10.00
        let lines = receipt_issued(Money::from_sen(1_002), Money::zero(), Money::from_sen(-2), true);
        let rounding = find(&lines, codes::ROUNDING);
        assert!(rounding.is_debit);
        assert_eq!(rounding.amount, Money::from_sen(2));
        assert_eq!(find(&lines, codes::CASH).amount, Money::from_sen(1_000));
        assert!(imbalance(&lines).is_zero());
    }

    #[test]
    fn card_receipt_goes_to_bank() {
        let lines = receipt_issued(Money::from_sen(900), Money::from_sen(54), Money::zero(), false);
        assert!(find(&lines, codes::BANK).is_debit);
    }

    #[test]
    fn reversal_flips_sides() {
        let sent = invoice_sent(Money::from_sen(1_000), Money::from_sen(60));
        let reversed = invoice_reversed(Money::from_sen(1_000), Money::from_sen(60));
        for (a, b) in sent.iter().zip(&reversed) {
            assert_eq!(a.account_code, b.account_code);
            assert_eq!(a.is_debit, !b.is_debit);
        }
    }

    proptest! {
        #[test]
        fn rules_always_balance(
            net in 0i64..10_000_000,
            tax in 0i64..1_000_000,
            rounding in -2i64..=2,
            cash in any::<bool>(),
        ) {
            let (net, tax, rounding) = (Money::from_sen(net), Money::from_sen(tax), Money::from_sen(rounding));
            prop_assert!(imbalance(&invoice_sent(net, tax)).is_zero());
            prop_assert!(imbalance(&payment_received(net, cash)).is_zero());
            prop_assert!(imbalance(&cost_of_sales(net)).is_zero());
            prop_assume!((net + tax + rounding).sen() >= 0);
            prop_assert!(imbalance(&receipt_issued(net, tax, rounding, cash)).is_zero());
            prop_assert!(imbalance(&receipt_voided(net, tax, rounding, cash)).is_zero());
        }
    }
}
