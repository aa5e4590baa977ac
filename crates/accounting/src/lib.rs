//! Accounting module (double-entry ledger, event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod chart;
pub mod ledger;
pub mod posting;

pub use chart::{Account, AccountKind, codes, default_chart};
pub use ledger::{
    InitializeChart, JournalCommand, JournalLine, Ledger, LedgerEvent, LedgerId, OpenAccount,
    PostJournalEntry, entry_id_for,
};
