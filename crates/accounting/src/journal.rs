use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use herdledger_core::{JournalEntryId, LedgerError, LedgerResult, Reference, round4};
use herdledger_events::Event;

/// Reference kind carried by correction entries.
pub const REVERSAL_KIND: &str = "reversal";

/// One line of a journal entry (immutable once posted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub narration: Option<String>,
}

impl JournalLine {
    pub fn debit(account_code: impl Into<String>, amount: Decimal, narration: impl Into<String>) -> Self {
        Self {
            account_code: account_code.into(),
            debit: amount,
            credit: Decimal::ZERO,
            narration: Some(narration.into()),
        }
    }

    pub fn credit(account_code: impl Into<String>, amount: Decimal, narration: impl Into<String>) -> Self {
        Self {
            account_code: account_code.into(),
            debit: Decimal::ZERO,
            credit: amount,
            narration: Some(narration.into()),
        }
    }

    fn validate(&self, index: usize) -> LedgerResult<()> {
        if self.account_code.trim().is_empty() {
            return Err(LedgerError::validation(format!(
                "line {index}: account code cannot be empty"
            )));
        }
        if self.debit < Decimal::ZERO || self.credit < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "line {index}: amounts must not be negative"
            )));
        }
        if !self.debit.is_zero() && !self.credit.is_zero() {
            return Err(LedgerError::validation(format!(
                "line {index}: a line is either a debit or a credit"
            )));
        }
        Ok(())
    }

    fn rounded(mut self) -> Self {
        self.debit = round4(self.debit);
        self.credit = round4(self.credit);
        self
    }
}

/// Request to post a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
    pub reference: Reference,
}

/// A posted, balanced journal entry.
///
/// Entries are never edited; corrections are posted as offsetting entries
/// (see [`JournalEntry::reversal`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    id: JournalEntryId,
    date: NaiveDate,
    description: String,
    reference: Reference,
    lines: Vec<JournalLine>,
    created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Validate and build a posted entry.
    ///
    /// Line amounts are rounded to four digits first, so the balance check
    /// runs on exactly what gets stored.
    pub fn post(id: JournalEntryId, new: NewJournalEntry, created_at: DateTime<Utc>) -> LedgerResult<Self> {
        if new.lines.is_empty() {
            return Err(LedgerError::validation("journal entry must have lines"));
        }

        for (i, line) in new.lines.iter().enumerate() {
            line.validate(i)?;
        }

        let lines: Vec<JournalLine> = new.lines.into_iter().map(JournalLine::rounded).collect();
        let (debit, credit) = totals(&lines);
        if debit != credit {
            return Err(LedgerError::UnbalancedEntry { debit, credit });
        }

        Ok(Self {
            id,
            date: new.date,
            description: new.description,
            reference: new.reference,
            lines,
            created_at,
        })
    }

    pub fn id(&self) -> JournalEntryId {
        self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `(sum(debit), sum(credit))`.
    pub fn totals(&self) -> (Decimal, Decimal) {
        totals(&self.lines)
    }

    pub fn is_balanced(&self) -> bool {
        let (debit, credit) = self.totals();
        debit == credit
    }

    /// The entry this one reverses, if it is a correction.
    pub fn reverses(&self) -> Option<JournalEntryId> {
        if self.reference.kind == REVERSAL_KIND {
            self.reference.id.map(JournalEntryId::from_uuid)
        } else {
            None
        }
    }

    /// Offsetting entry: every debit becomes a credit and vice versa.
    pub fn reversal(&self, id: JournalEntryId, date: NaiveDate, created_at: DateTime<Utc>) -> LedgerResult<Self> {
        let lines = self
            .lines
            .iter()
            .map(|l| JournalLine {
                account_code: l.account_code.clone(),
                debit: l.credit,
                credit: l.debit,
                narration: Some(format!("reversal of {}", self.id)),
            })
            .collect();

        Self::post(
            id,
            NewJournalEntry {
                date,
                description: format!("Reversal: {}", self.description),
                lines,
                reference: Reference::new(REVERSAL_KIND, self.id),
            },
            created_at,
        )
    }
}

fn totals(lines: &[JournalLine]) -> (Decimal, Decimal) {
    let debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let credit: Decimal = lines.iter().map(|l| l.credit).sum();
    (round4(debit), round4(credit))
}

/// Event: a journal entry was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecorded {
    pub entry_id: JournalEntryId,
    pub reference: Reference,
    /// Sum of debits (equal to sum of credits).
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    EntryRecorded(EntryRecorded),
}

impl JournalEvent {
    pub fn recorded(entry: &JournalEntry) -> Self {
        JournalEvent::EntryRecorded(EntryRecorded {
            entry_id: entry.id(),
            reference: entry.reference().clone(),
            total: entry.totals().0,
            occurred_at: entry.created_at(),
        })
    }
}

impl Event for JournalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JournalEvent::EntryRecorded(_) => "accounting.journal.entry_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JournalEvent::EntryRecorded(e) => e.occurred_at,
        }
    }
}
