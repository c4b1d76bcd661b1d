use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use herdledger_core::{MovementId, Reference};

use crate::key::StockKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    In,
    Out,
}

/// Audit record of one inflow or outflow (the stock movements report).
///
/// For inflows `unit_cost` is the receipt cost and `total_cost` the lot total.
/// For outflows `unit_cost` is the running average at the time of issue and
/// `total_cost` the FIFO cost actually relieved from the lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub key: StockKey,
    pub direction: MovementDirection,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub reference: Reference,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    /// Quantity with sign: positive for inflow, negative for outflow.
    pub fn signed_quantity(&self) -> Decimal {
        match self.direction {
            MovementDirection::In => self.quantity,
            MovementDirection::Out => -self.quantity,
        }
    }
}

/// Net quantity over a movement history.
pub fn net_quantity<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Decimal {
    movements.into_iter().map(StockMovement::signed_quantity).sum()
}
