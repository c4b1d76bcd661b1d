//! Per-account totals over posted journal entries.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::journal::JournalEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTotals {
    pub debit: Decimal,
    pub credit: Decimal,
}

impl AccountTotals {
    /// Debit-positive balance.
    pub fn balance(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// Trial balance: debit/credit totals per account code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    accounts: BTreeMap<String, AccountTotals>,
}

impl TrialBalance {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a JournalEntry>) -> Self {
        let mut tb = Self::default();
        for entry in entries {
            for line in entry.lines() {
                let totals = tb.accounts.entry(line.account_code.clone()).or_default();
                totals.debit += line.debit;
                totals.credit += line.credit;
            }
        }
        tb
    }

    pub fn account(&self, code: &str) -> Option<&AccountTotals> {
        self.accounts.get(code)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&str, &AccountTotals)> {
        self.accounts.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn total_debit(&self) -> Decimal {
        self.accounts.values().map(|t| t.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.accounts.values().map(|t| t.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit() == self.total_credit()
    }
}
