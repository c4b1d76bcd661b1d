//! Inventory valuation domain.
//!
//! Pure, deterministic rules for stock positions (weighted-average cost) and
//! cost lots (FIFO audit trail). No IO, no locks, no storage: callers hand in
//! the current rows and persist what comes back.

pub mod cost_lot;
pub mod event;
pub mod key;
pub mod movement;
pub mod position;

pub use cost_lot::{CostLot, CostLotJournal, FifoConsumption, LotSlice, remaining};
pub use event::{InflowApplied, OutflowApplied, StockEvent, UnitConsumed};
pub use key::{ItemType, StockKey};
pub use movement::{MovementDirection, StockMovement, net_quantity};
pub use position::{StockPosition, validate_inflow, validate_outflow};
