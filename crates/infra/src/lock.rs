//! Application-level exclusive locks keyed by ledger row.
//!
//! Stands in for `SELECT ... FOR UPDATE`: the first touch of a key inside a
//! transaction takes the lock, and it is held until commit or rollback.
//! Waiters block on a condition variable, bounded by the configured timeout.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use herdledger_core::{JournalEntryId, LedgerError, LedgerResult, TransactionId};
use herdledger_inventory::StockKey;

/// A lockable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    /// A stock position together with its cost lots.
    Stock(StockKey),
    /// A posted journal entry (serializes reversals of the same entry).
    JournalEntry(JournalEntryId),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Stock(key) => write!(f, "stock {key}"),
            LockKey::JournalEntry(id) => write!(f, "journal entry {id}"),
        }
    }
}

/// Exclusive, re-entrant (per transaction) key locks.
#[derive(Debug, Default)]
pub struct KeyLockManager {
    held: Mutex<HashMap<LockKey, TransactionId>>,
    released: Condvar,
}

impl KeyLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` for `owner`, waiting at most `timeout`.
    ///
    /// Returns immediately if `owner` already holds it.
    pub fn acquire(&self, key: LockKey, owner: TransactionId, timeout: Duration) -> LedgerResult<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|_| LedgerError::storage("lock table poisoned"))?;

        loop {
            match held.get(&key) {
                None => {
                    held.insert(key, owner);
                    return Ok(());
                }
                Some(current) if *current == owner => return Ok(()),
                Some(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::LockTimeout {
                    key: key.to_string(),
                    waited: now - started,
                });
            }

            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| LedgerError::storage("lock table poisoned"))?;
            held = guard;
        }
    }

    /// Release every key in `keys` that `owner` holds and wake all waiters.
    pub fn release_all(&self, owner: TransactionId, keys: &[LockKey]) {
        if keys.is_empty() {
            return;
        }
        // Releasing must happen even after a panic elsewhere poisoned the table.
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in keys {
            if held.get(key) == Some(&owner) {
                held.remove(key);
            }
        }
        drop(held);
        self.released.notify_all();
    }

    pub fn holder(&self, key: &LockKey) -> Option<TransactionId> {
        self.held.lock().ok()?.get(key).copied()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}
