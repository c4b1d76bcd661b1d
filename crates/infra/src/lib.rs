//! Infrastructure layer: the transactional ledger store and the services
//! that move quantity and cost through it.
//!
//! ```text
//! caller ─┬─ StockLedger::apply_inflow / apply_outflow / transfer
//!         ├─ DoubleEntryLedger::record / reverse
//!         └─ SlaughterConverter::convert ── drives the two above
//!                    │
//!              Transaction (key locks + staged writes)
//!                    │ commit
//!              LedgerStore (committed tables) ── EventBus (after commit)
//! ```

pub mod config;
pub mod event;
pub mod ledger;
pub mod lock;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::LedgerConfig;
pub use event::LedgerEvent;
pub use ledger::conversion::{
    ConversionOutcome, ConversionRecord, ConvertUnit, SLAUGHTER_KIND, SlaughterConverter,
};
pub use ledger::journal::DoubleEntryLedger;
pub use ledger::stock::{
    Inflow, InflowOutcome, Outflow, OutflowOutcome, StockLedger, Transfer, TransferOutcome,
};
pub use lock::{KeyLockManager, LockKey};
pub use store::{LedgerSnapshot, LedgerStore, LedgerStoreBuilder, StockBalanceLine, Transaction};
