//! Accounting module (double-entry journal).
//!
//! Pure domain logic only: no IO, no locks, no persistence concerns.

pub mod accounts;
pub mod journal;
pub mod trial_balance;

pub use accounts::AccountCodes;
pub use journal::{
    EntryRecorded, JournalEntry, JournalEvent, JournalLine, NewJournalEntry, REVERSAL_KIND,
};
pub use trial_balance::{AccountTotals, TrialBalance};
