use chrono::NaiveDate;
use tracing::instrument;

use herdledger_accounting::{JournalEntry, NewJournalEntry};
use herdledger_core::{JournalEntryId, LedgerError, LedgerResult};

use crate::store::{LedgerStore, Transaction};

/// Posts balanced journal entries. Posted entries are never edited.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleEntryLedger;

impl DoubleEntryLedger {
    /// Validate and stage `entry`; nothing is staged when it does not balance.
    #[instrument(
        skip_all,
        fields(tx = %tx.id(), reference = %entry.reference, lines = entry.lines.len())
    )]
    pub fn record(tx: &mut Transaction, entry: NewJournalEntry) -> LedgerResult<JournalEntryId> {
        Self::record_as(tx, JournalEntryId::new(), entry)
    }

    /// [`record`](Self::record) with a caller-chosen id.
    pub(crate) fn record_as(
        tx: &mut Transaction,
        id: JournalEntryId,
        entry: NewJournalEntry,
    ) -> LedgerResult<JournalEntryId> {
        tx.ensure_open()?;
        let posted = JournalEntry::post(id, entry, tx.now())?;
        tx.run(|tx| {
            tx.push_journal(posted);
            Ok(id)
        })
    }

    /// Post the offsetting entry for `entry_id`.
    #[instrument(skip_all, fields(tx = %tx.id(), entry = %entry_id, %date))]
    pub fn reverse(
        tx: &mut Transaction,
        entry_id: JournalEntryId,
        date: NaiveDate,
    ) -> LedgerResult<JournalEntryId> {
        tx.run(|tx| {
            tx.lock_entry(entry_id)?;

            let original = tx
                .journal_entry(entry_id)?
                .ok_or_else(|| LedgerError::not_found(format!("journal entry {entry_id}")))?;
            if let Some(existing) = tx.find_reversal(entry_id)? {
                return Err(LedgerError::validation(format!(
                    "journal entry {entry_id} already reversed by {existing}"
                )));
            }
            if original.reverses().is_some() {
                return Err(LedgerError::validation(format!(
                    "journal entry {entry_id} is itself a reversal"
                )));
            }

            let reversal = original.reversal(JournalEntryId::new(), date, tx.now())?;
            let id = reversal.id();
            tx.push_journal(reversal);
            Ok(id)
        })
    }

    /// Re-check that every committed entry balances. Returns the entry count.
    pub fn verify_history(store: &LedgerStore) -> LedgerResult<usize> {
        let entries = store.journal_entries()?;
        for entry in &entries {
            let (debit, credit) = entry.totals();
            if debit != credit {
                return Err(LedgerError::inconsistency(format!(
                    "journal entry {} does not balance: debit {debit} credit {credit}",
                    entry.id()
                )));
            }
        }
        Ok(entries.len())
    }
}
