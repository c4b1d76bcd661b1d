//! Transactional ledger store.
//!
//! Committed state lives in one table set behind an `RwLock`. Writers never
//! touch it directly: they stage rows in a [`Transaction`] while holding key
//! locks, and `commit()` applies the whole working set in one step.

mod transaction;

pub use transaction::Transaction;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use herdledger_accounting::{JournalEntry, TrialBalance};
use herdledger_core::{
    Clock, ConversionId, ItemId, JournalEntryId, LedgerError, LedgerResult, SystemClock,
};
use herdledger_events::{EventBus, EventEnvelope};
use herdledger_inventory::{CostLot, StockKey, StockMovement, StockPosition, remaining};

use crate::config::LedgerConfig;
use crate::event::LedgerEvent;
use crate::ledger::conversion::ConversionRecord;
use crate::lock::KeyLockManager;

/// Every committed row. Cloned whole by [`LedgerStore::snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub positions: HashMap<StockKey, StockPosition>,
    pub lots: HashMap<StockKey, Vec<CostLot>>,
    pub movements: Vec<StockMovement>,
    pub journal: Vec<JournalEntry>,
    pub conversions: Vec<ConversionRecord>,
    pub consumed_units: HashSet<ItemId>,
}

/// One row of the stock balance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalanceLine {
    pub key: StockKey,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub value: Decimal,
    pub last_updated: DateTime<Utc>,
}

type Publisher = dyn Fn(EventEnvelope<LedgerEvent>) -> Result<(), String> + Send + Sync;

struct StoreInner {
    tables: RwLock<LedgerSnapshot>,
    locks: KeyLockManager,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    publisher: Option<Box<Publisher>>,
    lot_seq: AtomicU64,
    /// Last assigned event sequence number (assigned under the tables write lock).
    event_seq: AtomicU64,
    /// Held from sequence assignment until publication ends, so subscribers
    /// see envelopes in sequence order.
    publish_gate: Mutex<()>,
}

/// Handle to the shared ledger store. Cheap to clone.
#[derive(Clone)]
pub struct LedgerStore {
    inner: Arc<StoreInner>,
}

impl core::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("config", &self.inner.config)
            .field("locks_held", &self.inner.locks.held_count())
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    pub fn new(config: LedgerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: LedgerConfig) -> LedgerStoreBuilder {
        LedgerStoreBuilder {
            config,
            clock: None,
            publisher: None,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Start a transaction. Nothing is locked until a key is first touched.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// A panic inside `f` drops the transaction, which rolls it back.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut tx = self.begin();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    // ---- committed reads ----

    pub fn position(&self, key: &StockKey) -> LedgerResult<Option<StockPosition>> {
        Ok(self.read()?.positions.get(key).cloned())
    }

    /// Lots of `key` in FIFO order.
    pub fn lots(&self, key: &StockKey) -> LedgerResult<Vec<CostLot>> {
        let mut lots = self.read()?.lots.get(key).cloned().unwrap_or_default();
        lots.sort_by_key(|l| (l.created_at(), l.seq()));
        Ok(lots)
    }

    pub fn movements(&self, key: &StockKey) -> LedgerResult<Vec<StockMovement>> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|m| m.key == *key)
            .cloned()
            .collect())
    }

    pub fn journal_entries(&self) -> LedgerResult<Vec<JournalEntry>> {
        Ok(self.read()?.journal.clone())
    }

    pub fn journal_entry(&self, id: JournalEntryId) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.read()?.journal.iter().find(|e| e.id() == id).cloned())
    }

    pub fn conversions(&self) -> LedgerResult<Vec<ConversionRecord>> {
        Ok(self.read()?.conversions.clone())
    }

    pub fn conversion(&self, id: ConversionId) -> LedgerResult<Option<ConversionRecord>> {
        Ok(self.read()?.conversions.iter().find(|c| c.id == id).cloned())
    }

    /// Whether `unit` went through a conversion (terminal state).
    pub fn is_consumed(&self, unit: ItemId) -> LedgerResult<bool> {
        Ok(self.read()?.consumed_units.contains(&unit))
    }

    /// Stock balance report: every position with its book value.
    pub fn stock_balance(&self) -> LedgerResult<Vec<StockBalanceLine>> {
        let tables = self.read()?;
        let mut lines: Vec<StockBalanceLine> = tables
            .positions
            .values()
            .map(|p| StockBalanceLine {
                key: p.key(),
                quantity: p.quantity(),
                avg_cost: p.avg_cost(),
                value: p.value(),
                last_updated: p.last_updated(),
            })
            .collect();
        lines.sort_by_key(|l| l.key);
        Ok(lines)
    }

    pub fn trial_balance(&self) -> LedgerResult<TrialBalance> {
        Ok(TrialBalance::from_entries(&self.read()?.journal))
    }

    /// Check `quantity == sum(lot.remaining_qty)` for every key.
    pub fn verify_positions(&self) -> LedgerResult<usize> {
        let tables = self.read()?;
        for (key, position) in &tables.positions {
            let lots = tables.lots.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let held = remaining(lots);
            if held != position.quantity() {
                return Err(LedgerError::inconsistency(format!(
                    "{key}: position holds {} but lots hold {held}",
                    position.quantity()
                )));
            }
        }
        Ok(tables.positions.len())
    }

    pub fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        Ok(self.read()?.clone())
    }

    pub fn locks_held(&self) -> usize {
        self.inner.locks.held_count()
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, LedgerSnapshot>> {
        self.inner
            .tables
            .read()
            .map_err(|_| LedgerError::storage("ledger tables poisoned"))
    }

    // ---- crate-internal plumbing for transactions ----

    pub(crate) fn inner_tables(&self) -> &RwLock<LedgerSnapshot> {
        &self.inner.tables
    }

    pub(crate) fn locks(&self) -> &KeyLockManager {
        &self.inner.locks
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub(crate) fn next_lot_seq(&self) -> u64 {
        self.inner.lot_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reserve `count` consecutive event sequence numbers; returns the first.
    pub(crate) fn reserve_event_seq(&self, count: u64) -> u64 {
        self.inner.event_seq.fetch_add(count, Ordering::SeqCst) + 1
    }

    /// Serializes publication across commits. A publisher that panicked
    /// leaves nothing half-written behind the gate, so poisoning is ignored.
    pub(crate) fn publish_gate(&self) -> MutexGuard<'_, ()> {
        self.inner
            .publish_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand committed events to the bus. Failures do not undo the commit.
    pub(crate) fn publish(&self, envelopes: Vec<EventEnvelope<LedgerEvent>>) {
        let Some(publisher) = &self.inner.publisher else {
            return;
        };
        for envelope in envelopes {
            let seq = envelope.sequence_number();
            if let Err(error) = publisher(envelope) {
                warn!(sequence = seq, error = %error, "failed to publish committed ledger event");
            }
        }
    }
}

/// Builder for [`LedgerStore`] (clock and bus are optional).
pub struct LedgerStoreBuilder {
    config: LedgerConfig,
    clock: Option<Arc<dyn Clock>>,
    publisher: Option<Box<Publisher>>,
}

impl LedgerStoreBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish committed events to `bus`.
    ///
    /// Delivery happens after the commit, in sequence order. The bus must not
    /// commit to this store from inside `publish`.
    pub fn event_bus<B>(mut self, bus: B) -> Self
    where
        B: EventBus<EventEnvelope<LedgerEvent>> + 'static,
    {
        self.publisher = Some(Box::new(move |envelope: EventEnvelope<LedgerEvent>| {
            bus.publish(envelope).map_err(|err| format!("{err:?}"))
        }));
        self
    }

    pub fn build(self) -> LedgerStore {
        LedgerStore {
            inner: Arc::new(StoreInner {
                tables: RwLock::new(LedgerSnapshot::default()),
                locks: KeyLockManager::new(),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                config: self.config,
                publisher: self.publisher,
                lot_seq: AtomicU64::new(0),
                event_seq: AtomicU64::new(0),
                publish_gate: Mutex::new(()),
            }),
        }
    }
}
