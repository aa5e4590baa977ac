use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kedai_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use kedai_events::Event;

use crate::chart::{Account, default_chart};

kedai_core::typed_id!(LedgerId, "LedgerId");

impl LedgerId {
    /// The single ledger of a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::derived(tenant_id, "accounting.ledger"))
    }
}

/// Deterministic journal entry id for an effect of a source document, so
/// a retried posting is rejected as a duplicate instead of doubling.
pub fn entry_id_for(source: AggregateId, purpose: &str) -> Uuid {
    Uuid::new_v5(source.as_uuid(), purpose.as_bytes())
}

/// One side of a journal entry (immutable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: String,
    /// Positive amount.
    pub amount: Money,
    /// true = debit, false = credit.
    pub is_debit: bool,
}

impl JournalLine {
    pub fn debit(account_code: &str, amount: Money) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount,
            is_debit: true,
        }
    }

    pub fn credit(account_code: &str, amount: Money) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount,
            is_debit: false,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            is_debit: !self.is_debit,
            ..self.clone()
        }
    }
}

/// Aggregate root: Ledger (chart of accounts + journal).
///
/// Holds the chart and the lines of every posted entry, keyed by entry id.
/// Balances are derived from projections over `JournalEntryPosted` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    tenant_id: Option<TenantId>,
    accounts: BTreeMap<String, Account>,
    posted: BTreeMap<Uuid, Vec<JournalLine>>,
    version: u64,
    created: bool,
}

impl Ledger {
    /// Empty aggregate for rehydration.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            tenant_id: None,
            accounts: BTreeMap::new(),
            posted: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_initialized(&self) -> bool {
        self.created
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn account(&self, code: &str) -> Option<&Account> {
        self.accounts.get(code)
    }

    pub fn has_posted(&self, entry_id: Uuid) -> bool {
        self.posted.contains_key(&entry_id)
    }

    /// Lines of a posted entry.
    pub fn entry(&self, entry_id: Uuid) -> Option<&[JournalLine]> {
        self.posted.get(&entry_id).map(Vec::as_slice)
    }

    /// Every posted entry, by entry id.
    pub fn entries(&self) -> impl Iterator<Item = (Uuid, &[JournalLine])> {
        self.posted.iter().map(|(id, lines)| (*id, lines.as_slice()))
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: InitializeChart (creates the ledger with the default chart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeChart {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OpenAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub account: Account,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostJournalEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostJournalEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry_id: Uuid,
    pub lines: Vec<JournalLine>,
    pub description: String,
    /// Originating document number (invoice, receipt), if any.
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalCommand {
    InitializeChart(InitializeChart),
    OpenAccount(OpenAccount),
    PostJournalEntry(PostJournalEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    ChartInitialized {
        tenant_id: TenantId,
        ledger_id: LedgerId,
        accounts: Vec<Account>,
        occurred_at: DateTime<Utc>,
    },
    AccountOpened {
        tenant_id: TenantId,
        ledger_id: LedgerId,
        account: Account,
        occurred_at: DateTime<Utc>,
    },
    JournalEntryPosted {
        tenant_id: TenantId,
        ledger_id: LedgerId,
        entry_id: Uuid,
        lines: Vec<JournalLine>,
        description: String,
        source: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            LedgerEvent::ChartInitialized { tenant_id, .. }
            | LedgerEvent::AccountOpened { tenant_id, .. }
            | LedgerEvent::JournalEntryPosted { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::ChartInitialized { .. } => "accounting.ledger.chart_initialized",
            LedgerEvent::AccountOpened { .. } => "accounting.ledger.account_opened",
            LedgerEvent::JournalEntryPosted { .. } => "accounting.ledger.journal_entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::ChartInitialized { occurred_at, .. }
            | LedgerEvent::AccountOpened { occurred_at, .. }
            | LedgerEvent::JournalEntryPosted { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = JournalCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::ChartInitialized {
                tenant_id,
                ledger_id,
                accounts,
                ..
            } => {
                self.id = *ledger_id;
                self.tenant_id = Some(*tenant_id);
                for account in accounts {
                    self.accounts.insert(account.code.clone(), account.clone());
                }
                self.created = true;
            }
            LedgerEvent::AccountOpened { account, .. } => {
                self.accounts.insert(account.code.clone(), account.clone());
            }
            LedgerEvent::JournalEntryPosted {
                entry_id, lines, ..
            } => {
                self.posted.insert(*entry_id, lines.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JournalCommand::InitializeChart(cmd) => self.handle_initialize(cmd),
            JournalCommand::OpenAccount(cmd) => self.handle_open(cmd),
            JournalCommand::PostJournalEntry(cmd) => self.handle_post(cmd),
        }
    }
}

impl Ledger {
    fn ensure_existing(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::invariant("chart of accounts is not initialized"));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_initialize(&self, cmd: &InitializeChart) -> Result<Vec<LedgerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("chart of accounts already initialized"));
        }
        Ok(vec![LedgerEvent::ChartInitialized {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            accounts: default_chart(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;
        let account = cmd.account.validated()?;
        if self.accounts.contains_key(&account.code) {
            return Err(DomainError::conflict(format!(
                "account {} already exists",
                account.code
            )));
        }
        Ok(vec![LedgerEvent::AccountOpened {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            account,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_post(&self, cmd: &PostJournalEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;

        if self.posted.contains_key(&cmd.entry_id) {
            return Err(DomainError::conflict(format!(
                "journal entry {} already posted",
                cmd.entry_id
            )));
        }
        if cmd.lines.len() < 2 {
            return Err(DomainError::validation(
                "journal entry needs at least two lines",
            ));
        }
        let description = kedai_core::validate::required("description", &cmd.description)?;

        let mut debit_total = Money::zero();
        let mut credit_total = Money::zero();
        for line in &cmd.lines {
            if !line.amount.is_positive() {
                return Err(DomainError::validation("amount must be positive"));
            }
            if !self.accounts.contains_key(&line.account_code) {
                return Err(DomainError::validation(format!(
                    "unknown account {}",
                    line.account_code
                )));
            }
            if line.is_debit {
                debit_total = debit_total.checked_add(line.amount)?;
            } else {
                credit_total = credit_total.checked_add(line.amount)?;
            }
        }

        if debit_total != credit_total {
            return Err(DomainError::invariant(format!(
                "debits must equal credits (debits {debit_total}, credits {credit_total})"
            )));
        }

        Ok(vec![LedgerEvent::JournalEntryPosted {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            entry_id: cmd.entry_id,
            lines: cmd.lines.clone(),
            description,
            source: cmd.source.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{AccountKind, codes};
    use kedai_events::execute;
    use proptest::prelude::*;

    fn initialized() -> (TenantId, Ledger) {
        let tenant_id = TenantId::new();
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let mut ledger = Ledger::empty(ledger_id);
        execute(
            &mut ledger,
            &JournalCommand::InitializeChart(InitializeChart {
                tenant_id,
                ledger_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (tenant_id, ledger)
    }

    fn post(tenant_id: TenantId, ledger: &Ledger, entry_id: Uuid, lines: Vec<JournalLine>) -> JournalCommand {
        JournalCommand::PostJournalEntry(PostJournalEntry {
            tenant_id,
            ledger_id: ledger.id_typed(),
            entry_id,
            lines,
            description: "Cash sale".into(),
            source: Some("RCT-000001".into()),
            occurred_at: Utc::now(),
        })
    }

    fn cash_sale(sen: i64) -> Vec<JournalLine> {
        vec![
            JournalLine::debit(codes::CASH, Money::from_sen(sen)),
            JournalLine::credit(codes::SALES, Money::from_sen(sen)),
        ]
    }

    #[test]
    fn ledger_id_is_per_tenant() {
        let tenant = TenantId::new();
        assert_eq!(LedgerId::for_tenant(tenant), LedgerId::for_tenant(tenant));
        assert_ne!(LedgerId::for_tenant(tenant), LedgerId::for_tenant(TenantId::new()));
    }

    #[test]
    fn posting_requires_initialized_chart() {
        let tenant_id = TenantId::new();
        let ledger = Ledger::empty(LedgerId::for_tenant(tenant_id));
        let err = ledger
            .handle(&post(tenant_id, &ledger, Uuid::now_v7(), cash_sale(100)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn balanced_entry_is_posted_once() {
        let (tenant_id, mut ledger) = initialized();
        let entry_id = Uuid::now_v7();
        let cmd = post(tenant_id, &ledger, entry_id, cash_sale(1_000));
        execute(&mut ledger, &cmd).unwrap();
        assert!(ledger.has_posted(entry_id));
        assert!(matches!(ledger.handle(&cmd), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let (tenant_id, ledger) = initialized();
        let lines = vec![
            JournalLine::debit(codes::CASH, Money::from_sen(100)),
            JournalLine::credit(codes::SALES, Money::from_sen(90)),
        ];
        let err = ledger.handle(&post(tenant_id, &ledger, Uuid::now_v7(), lines)).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("debits must equal credits") => {}
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn unknown_account_and_single_line_are_rejected() {
        let (tenant_id, ledger) = initialized();
        let lines = vec![
            JournalLine::debit("1999", Money::from_sen(100)),
            JournalLine::credit(codes::SALES, Money::from_sen(100)),
        ];
        assert!(ledger.handle(&post(tenant_id, &ledger, Uuid::now_v7(), lines)).is_err());
        let single = vec![JournalLine::debit(codes::CASH, Money::from_sen(100))];
        assert!(ledger.handle(&post(tenant_id, &ledger, Uuid::now_v7(), single)).is_err());
    }

    #[test]
    fn opened_account_can_be_posted_to() {
        let (tenant_id, mut ledger) = initialized();
        let open = JournalCommand::OpenAccount(OpenAccount {
            tenant_id,
            ledger_id: ledger.id_typed(),
            account: Account::new("4100", "Delivery Fees", AccountKind::Revenue),
            occurred_at: Utc::now(),
        });
        execute(&mut ledger, &open).unwrap();
        assert!(matches!(ledger.handle(&open), Err(DomainError::Conflict(_))));

        let lines = vec![
            JournalLine::debit(codes::BANK, Money::from_sen(500)),
            JournalLine::credit("4100", Money::from_sen(500)),
        ];
        assert!(ledger.handle(&post(tenant_id, &ledger, Uuid::now_v7(), lines)).is_ok());
    }

    #[test]
    fn entry_ids_are_stable_per_purpose() {
        let source = AggregateId::new();
        assert_eq!(entry_id_for(source, "sent"), entry_id_for(source, "sent"));
        assert_ne!(entry_id_for(source, "sent"), entry_id_for(source, "reversed"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// For any sequence of balanced entries, the sum of debits minus
        /// credits across all posted events is zero.
        #[test]
        fn debits_equal_credits_in_posted_events(
            amounts in prop::collection::vec(1i64..1_000_000i64, 1..10)
        ) {
            let (tenant_id, mut ledger) = initialized();
            let mut all_events: Vec<LedgerEvent> = Vec::new();

            for amount in amounts {
                let cmd = post(tenant_id, &ledger, Uuid::now_v7(), cash_sale(amount));
                all_events.extend(execute(&mut ledger, &cmd).unwrap());
            }

            let mut total: i64 = 0;
            for ev in &all_events {
                if let LedgerEvent::JournalEntryPosted { lines, .. } = ev {
                    for line in lines {
                        if line.is_debit {
                            total += line.amount.sen();
                        } else {
                            total -= line.amount.sen();
                        }
                    }
                }
            }

            prop_assert_eq!(total, 0);
        }
    }
}
