use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use herdledger_accounting::{JournalEntry, JournalEvent};
use herdledger_core::{
    ExpectedVersion, ItemId, JournalEntryId, LedgerError, LedgerResult, TransactionId,
};
use herdledger_events::EventEnvelope;
use herdledger_inventory::{CostLot, StockKey, StockMovement, StockPosition};

use super::LedgerStore;
use crate::event::LedgerEvent;
use crate::ledger::conversion::ConversionRecord;
use crate::lock::LockKey;

/// Working copy of one locked stock key.
#[derive(Debug)]
struct StagedStock {
    position: Option<StockPosition>,
    expected: ExpectedVersion,
    lots: Vec<CostLot>,
    dirty: bool,
}

/// A unit of work against the [`LedgerStore`].
///
/// Keys are locked on first touch and stay locked until `commit()` or
/// `rollback()`. Writes are staged here and only become visible on commit.
/// Once any operation inside the transaction fails, the transaction is
/// aborted: further work and `commit()` return that error.
///
/// Dropping an uncommitted transaction rolls it back.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    store: LedgerStore,
    locked: Vec<LockKey>,
    stock: HashMap<StockKey, StagedStock>,
    movements: Vec<StockMovement>,
    journal: Vec<JournalEntry>,
    conversions: Vec<ConversionRecord>,
    consumed: Vec<ItemId>,
    outbox: Vec<LedgerEvent>,
    aborted: Option<LedgerError>,
    finished: bool,
}

impl Transaction {
    pub(super) fn new(store: LedgerStore) -> Self {
        Self {
            id: TransactionId::new(),
            store,
            locked: Vec::new(),
            stock: HashMap::new(),
            movements: Vec::new(),
            journal: Vec::new(),
            conversions: Vec::new(),
            consumed: Vec::new(),
            outbox: Vec::new(),
            aborted: None,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The error that aborted this transaction, if any.
    pub fn aborted(&self) -> Option<&LedgerError> {
        self.aborted.as_ref()
    }

    /// Locking read of a position as this transaction sees it.
    pub fn position(&mut self, key: StockKey) -> LedgerResult<Option<StockPosition>> {
        self.run(|tx| Ok(tx.stage(key)?.position.clone()))
    }

    /// Make every staged write visible atomically, then publish the outbox.
    pub fn commit(mut self) -> LedgerResult<()> {
        if let Some(err) = self.aborted.take() {
            warn!(tx = %self.id, error = %err, "refusing to commit aborted transaction");
            return Err(err);
        }

        let store = self.store.clone();
        let (envelopes, _gate) = {
            let mut tables = store
                .inner_tables()
                .write()
                .map_err(|_| LedgerError::storage("ledger tables poisoned"))?;

            for (key, staged) in &self.stock {
                if staged.dirty {
                    let actual = tables.positions.get(key).map(StockPosition::version);
                    staged.expected.check(actual)?;
                }
            }

            let outbox = std::mem::take(&mut self.outbox);
            let first = store.reserve_event_seq(outbox.len() as u64);
            let envelopes = outbox
                .into_iter()
                .zip(first..)
                .map(|(event, seq)| EventEnvelope::wrap(self.id, seq, event))
                .collect::<Vec<_>>();
            let gate = store.publish_gate();

            for (key, staged) in std::mem::take(&mut self.stock) {
                if !staged.dirty {
                    continue;
                }
                if let Some(position) = staged.position {
                    tables.positions.insert(key, position);
                }
                tables.lots.insert(key, staged.lots);
            }
            tables.movements.append(&mut self.movements);
            tables.journal.append(&mut self.journal);
            tables.conversions.append(&mut self.conversions);
            tables.consumed_units.extend(self.consumed.drain(..));

            (envelopes, gate)
        };

        self.finish();
        debug!(tx = %self.id, events = envelopes.len(), "transaction committed");
        store.publish(envelopes);
        Ok(())
    }

    /// Discard every staged write and release the locks.
    pub fn rollback(mut self) {
        debug!(tx = %self.id, aborted = self.aborted.is_some(), "transaction rolled back");
        self.finish();
    }

    fn finish(&mut self) {
        self.store.locks().release_all(self.id, &self.locked);
        self.locked.clear();
        self.finished = true;
    }

    // ---- staging API used by the ledger services ----

    /// Fails with the aborting error once the transaction is aborted.
    pub(crate) fn ensure_open(&self) -> LedgerResult<()> {
        match &self.aborted {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Run `op`; any failure aborts the transaction.
    pub(crate) fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> LedgerResult<T>) -> LedgerResult<T> {
        self.ensure_open()?;
        let result = op(self);
        if let Err(err) = &result {
            debug!(tx = %self.id, category = err.category(), error = %err, "transaction aborted");
            self.aborted = Some(err.clone());
        }
        result
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    pub(crate) fn next_lot_seq(&self) -> u64 {
        self.store.next_lot_seq()
    }

    fn acquire(&mut self, key: LockKey) -> LedgerResult<()> {
        if self.locked.contains(&key) {
            return Ok(());
        }
        let timeout = self.store.config().lock_timeout();
        self.store.locks().acquire(key, self.id, timeout)?;
        self.locked.push(key);
        Ok(())
    }

    /// Lock several stock keys in a fixed global order.
    pub(crate) fn lock_stock(&mut self, keys: &[StockKey]) -> LedgerResult<()> {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        for key in ordered {
            self.stage(key)?;
        }
        Ok(())
    }

    /// Lock `key` on first touch and load its committed rows.
    fn stage(&mut self, key: StockKey) -> LedgerResult<&mut StagedStock> {
        if !self.stock.contains_key(&key) {
            self.acquire(LockKey::Stock(key))?;
            let (position, lots) = {
                let tables = self
                    .store
                    .inner_tables()
                    .read()
                    .map_err(|_| LedgerError::storage("ledger tables poisoned"))?;
                (
                    tables.positions.get(&key).cloned(),
                    tables.lots.get(&key).cloned().unwrap_or_default(),
                )
            };
            let expected = match &position {
                Some(p) => ExpectedVersion::Exact(p.version()),
                None => ExpectedVersion::Absent,
            };
            self.stock.insert(
                key,
                StagedStock {
                    position,
                    expected,
                    lots,
                    dirty: false,
                },
            );
        }
        self.stock
            .get_mut(&key)
            .ok_or_else(|| LedgerError::storage(format!("staging lost for {key}")))
    }

    /// Staged position, or a fresh zero row if the key has none yet.
    pub(crate) fn position_or_empty(&mut self, key: StockKey) -> LedgerResult<StockPosition> {
        let now = self.now();
        let staged = self.stage(key)?;
        Ok(staged
            .position
            .clone()
            .unwrap_or_else(|| StockPosition::empty(key, now)))
    }

    /// Like [`position_or_empty`](Self::position_or_empty), but a missing row
    /// is staged for insertion. Returns whether it was created.
    pub(crate) fn ensure_position(&mut self, key: StockKey) -> LedgerResult<(StockPosition, bool)> {
        let now = self.now();
        let staged = self.stage(key)?;
        let created = staged.position.is_none();
        if created {
            staged.position = Some(StockPosition::empty(key, now));
            staged.dirty = true;
        }
        let position = staged
            .position
            .clone()
            .ok_or_else(|| LedgerError::storage(format!("staging lost for {key}")))?;
        Ok((position, created))
    }

    pub(crate) fn put_position(&mut self, position: StockPosition) -> LedgerResult<()> {
        let staged = self.stage(position.key())?;
        staged.position = Some(position);
        staged.dirty = true;
        Ok(())
    }

    pub(crate) fn lots_mut(&mut self, key: StockKey) -> LedgerResult<&mut Vec<CostLot>> {
        let staged = self.stage(key)?;
        staged.dirty = true;
        Ok(&mut staged.lots)
    }

    pub(crate) fn push_movement(&mut self, movement: StockMovement) {
        self.movements.push(movement);
    }

    /// Stage a posted entry and its `EntryRecorded` event.
    pub(crate) fn push_journal(&mut self, entry: JournalEntry) {
        self.outbox.push(JournalEvent::recorded(&entry).into());
        self.journal.push(entry);
    }

    pub(crate) fn lock_entry(&mut self, id: JournalEntryId) -> LedgerResult<()> {
        self.acquire(LockKey::JournalEntry(id))
    }

    /// Entry by id, staged or committed.
    pub(crate) fn journal_entry(&self, id: JournalEntryId) -> LedgerResult<Option<JournalEntry>> {
        if let Some(entry) = self.journal.iter().find(|e| e.id() == id) {
            return Ok(Some(entry.clone()));
        }
        self.store.journal_entry(id)
    }

    /// The entry reversing `id`, staged or committed.
    pub(crate) fn find_reversal(&self, id: JournalEntryId) -> LedgerResult<Option<JournalEntryId>> {
        if let Some(entry) = self.journal.iter().find(|e| e.reverses() == Some(id)) {
            return Ok(Some(entry.id()));
        }
        Ok(self
            .store
            .journal_entries()?
            .iter()
            .find(|e| e.reverses() == Some(id))
            .map(JournalEntry::id))
    }

    pub(crate) fn push_conversion(&mut self, record: ConversionRecord) {
        self.conversions.push(record);
    }

    pub(crate) fn mark_consumed(&mut self, unit: ItemId) {
        self.consumed.push(unit);
    }

    /// Consumed, staged or committed. Callers hold the unit's stock lock.
    pub(crate) fn is_consumed(&self, unit: ItemId) -> LedgerResult<bool> {
        Ok(self.consumed.contains(&unit) || self.store.is_consumed(unit)?)
    }

    pub(crate) fn emit(&mut self, event: impl Into<LedgerEvent>) {
        self.outbox.push(event.into());
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            debug!(tx = %self.id, "transaction dropped without commit; rolling back");
            self.finish();
        }
    }
}
