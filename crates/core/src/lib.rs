//! `herdledger-core` — shared building blocks for the valuation ledger.
//!
//! This crate contains **pure** primitives (no locks, no storage): identifiers,
//! the ledger error taxonomy, fixed-point rounding and the clock abstraction.

pub mod clock;
pub mod decimal;
pub mod error;
pub mod id;
pub mod version;

pub use clock::{Clock, FixedClock, SystemClock};
pub use decimal::{COST_SCALE, round4};
pub use error::{LedgerError, LedgerResult};
pub use id::{
    ConversionId, CostLotId, ItemId, JournalEntryId, LocationId, MovementId, Reference,
    TransactionId,
};
pub use version::ExpectedVersion;

pub use rust_decimal::Decimal;
