use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use kedai_accounting::{Account, AccountKind, JournalLine, Ledger, LedgerEvent, LedgerId};
use kedai_core::{Money, TenantId};
use kedai_events::EventEnvelope;

use super::{decode, ensure_scope, Projection, ProjectionError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, Page, PageRequest, TenantStore};
use crate::streams::StreamAggregate;

/// Per-account totals for a tenant.
///
/// `balance` is signed on the account's normal side: positive when an
/// asset holds value or a revenue account has earned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account_code: String,
    pub account_name: String,
    pub kind: AccountKind,
    pub debits: Money,
    pub credits: Money,
    pub balance: Money,
}

impl AccountBalance {
    fn opened(account: &Account) -> Self {
        Self {
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            kind: account.kind,
            debits: Money::zero(),
            credits: Money::zero(),
            balance: Money::zero(),
        }
    }

    fn post(&mut self, line: &JournalLine) {
        if line.is_debit {
            self.debits += line.amount;
        } else {
            self.credits += line.amount;
        }
        self.balance = self.kind.balance(self.debits, self.credits);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntryReadModel {
    pub entry_id: Uuid,
    pub description: String,
    pub source: Option<String>,
    pub lines: Vec<JournalLine>,
    pub total: Money,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalanceLine {
    pub account_code: String,
    pub account_name: String,
    pub kind: AccountKind,
    pub debit: Money,
    pub credit: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalance {
    pub lines: Vec<TrialBalanceLine>,
    pub total_debits: Money,
    pub total_credits: Money,
    pub balanced: bool,
}

/// Projection: ledger stream → account balances and the journal.
pub struct LedgerProjection<
    B = InMemoryTenantStore<String, AccountBalance>,
    J = InMemoryTenantStore<Uuid, JournalEntryReadModel>,
> {
    balances: B,
    journal: J,
    cursors: StreamCursors,
}

impl LedgerProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new(), InMemoryTenantStore::new())
    }
}

impl<B, J> LedgerProjection<B, J>
where
    B: TenantStore<String, AccountBalance>,
    J: TenantStore<Uuid, JournalEntryReadModel>,
{
    pub fn new(balances: B, journal: J) -> Self {
        Self {
            balances,
            journal,
            cursors: StreamCursors::new(),
        }
    }

    pub fn balance(&self, tenant_id: TenantId, code: &str) -> Option<AccountBalance> {
        self.balances.get(tenant_id, &code.to_string())
    }

    /// Sorted by account code.
    pub fn balances(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
        let mut all = self.balances.list(tenant_id);
        all.sort_by(|a, b| a.account_code.cmp(&b.account_code));
        all
    }

    pub fn entry(&self, tenant_id: TenantId, entry_id: Uuid) -> Option<JournalEntryReadModel> {
        self.journal.get(tenant_id, &entry_id)
    }

    /// Newest entry first.
    pub fn journal(&self, tenant_id: TenantId) -> Vec<JournalEntryReadModel> {
        let mut all = self.journal.list(tenant_id);
        all.sort_by(|a, b| b.posted_at.cmp(&a.posted_at).then_with(|| b.entry_id.cmp(&a.entry_id)));
        all
    }

    pub fn journal_page(&self, tenant_id: TenantId, page: PageRequest) -> Page<JournalEntryReadModel> {
        Page::slice(self.journal(tenant_id), page)
    }

    /// Net position of every account on the debit or credit column.
    pub fn trial_balance(&self, tenant_id: TenantId) -> TrialBalance {
        let mut lines = Vec::new();
        let mut total_debits = Money::zero();
        let mut total_credits = Money::zero();
        for b in self.balances(tenant_id) {
            let net = b.debits - b.credits;
            let (debit, credit) = if net.is_negative() {
                (Money::zero(), -net)
            } else {
                (net, Money::zero())
            };
            total_debits += debit;
            total_credits += credit;
            lines.push(TrialBalanceLine {
                account_code: b.account_code,
                account_name: b.account_name,
                kind: b.kind,
                debit,
                credit,
            });
        }
        TrialBalance {
            lines,
            total_debits,
            total_credits,
            balanced: total_debits == total_credits,
        }
    }

    fn open(&self, tenant_id: TenantId, account: &Account) {
        let key = account.code.clone();
        if self.balances.get(tenant_id, &key).is_none() {
            self.balances.upsert(tenant_id, key, AccountBalance::opened(account));
        }
    }
}

impl<B, J> Projection for LedgerProjection<B, J>
where
    B: TenantStore<String, AccountBalance>,
    J: TenantStore<Uuid, JournalEntryReadModel>,
{
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Ledger::AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let ev: LedgerEvent = decode(envelope)?;
        let tenant_id = ev.tenant_id();
        ensure_scope(envelope, tenant_id, LedgerId::for_tenant(tenant_id).0)?;

        match ev {
            LedgerEvent::ChartInitialized { accounts, .. } => {
                for account in &accounts {
                    self.open(tenant_id, account);
                }
            }
            LedgerEvent::AccountOpened { account, .. } => self.open(tenant_id, &account),
            LedgerEvent::JournalEntryPosted {
                entry_id,
                lines,
                description,
                source,
                occurred_at,
                ..
            } => {
                let mut touched: Vec<AccountBalance> = Vec::with_capacity(lines.len());
                for line in &lines {
                    let existing = touched.iter().position(|b| b.account_code == line.account_code);
                    let idx = match existing {
                        Some(idx) => idx,
                        None => {
                            let balance = self
                                .balances
                                .get(tenant_id, &line.account_code)
                                .ok_or_else(|| {
                                    ProjectionError::Deserialize(format!(
                                        "journal line for unknown account {}",
                                        line.account_code
                                    ))
                                })?;
                            touched.push(balance);
                            touched.len() - 1
                        }
                    };
                    touched[idx].post(line);
                }
                for balance in touched {
                    self.balances.upsert(tenant_id, balance.account_code.clone(), balance);
                }

                let total: Money = lines.iter().filter(|l| l.is_debit).map(|l| l.amount).sum();
                self.journal.upsert(
                    tenant_id,
                    entry_id,
                    JournalEntryReadModel {
                        entry_id,
                        description,
                        source,
                        lines,
                        total,
                        posted_at: occurred_at,
                    },
                );
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.balances.clear_tenant(tenant_id);
        self.journal.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::test_support::envelope;
    use kedai_accounting::{codes, default_chart, posting};

    fn feed(p: &LedgerProjection, tenant: TenantId, events: &[LedgerEvent]) {
        let ledger_id = LedgerId::for_tenant(tenant);
        for (i, ev) in events.iter().enumerate() {
            p.apply_envelope(&envelope(tenant, ledger_id.0, "accounting.ledger", i as u64 + 1, ev))
                .unwrap();
        }
    }

    fn chart(tenant: TenantId) -> LedgerEvent {
        LedgerEvent::ChartInitialized {
            tenant_id: tenant,
            ledger_id: LedgerId::for_tenant(tenant),
            accounts: default_chart(),
            occurred_at: Utc::now(),
        }
    }

    fn posted(tenant: TenantId, minute: i64, lines: Vec<JournalLine>, description: &str) -> LedgerEvent {
        LedgerEvent::JournalEntryPosted {
            tenant_id: tenant,
            ledger_id: LedgerId::for_tenant(tenant),
            entry_id: Uuid::now_v7(),
            lines,
            description: description.to_string(),
            source: None,
            occurred_at: Utc::now() + chrono::Duration::minutes(minute),
        }
    }

    #[test]
    fn sale_and_payment_balances() {
        let p = LedgerProjection::in_memory();
        let tenant = TenantId::new();
        feed(
            &p,
            tenant,
            &[
                chart(tenant),
                posted(
                    tenant,
                    1,
                    posting::invoice_sent(Money::from_sen(10_000), Money::from_sen(600)),
                    "INV-000001",
                ),
                posted(
                    tenant,
                    2,
                    posting::payment_received(Money::from_sen(4_000), true),
                    "payment INV-000001",
                ),
            ],
        );

        assert_eq!(p.balance(tenant, codes::ACCOUNTS_RECEIVABLE).unwrap().balance, Money::from_sen(6_600));
        assert_eq!(p.balance(tenant, codes::SALES).unwrap().balance, Money::from_sen(10_000));
        assert_eq!(p.balance(tenant, codes::CASH).unwrap().balance, Money::from_sen(4_000));

        let tb = p.trial_balance(tenant);
        assert!(tb.balanced);
        assert_eq!(tb.total_debits, Money::from_sen(10_600));
        assert_eq!(p.journal(tenant)[0].description, "payment INV-000001");
        assert_eq!(p.balances(tenant).len(), default_chart().len());
    }

    #[test]
    fn posting_to_unknown_account_fails() {
        let p = LedgerProjection::in_memory();
        let tenant = TenantId::new();
        feed(&p, tenant, &[chart(tenant)]);
        let ev = posted(
            tenant,
            1,
            vec![
                JournalLine::debit("1999", Money::from_sen(100)),
                JournalLine::credit(codes::SALES, Money::from_sen(100)),
            ],
            "bad",
        );
        let env = envelope(tenant, LedgerId::for_tenant(tenant).0, "accounting.ledger", 2, &ev);
        assert!(p.apply_envelope(&env).is_err());
    }
}
