use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use herdledger_core::{ConversionId, CostLotId, ItemId, Reference};
use herdledger_events::Event;

use crate::key::StockKey;

/// Event: an inflow was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflowApplied {
    pub key: StockKey,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub new_quantity: Decimal,
    pub new_avg_cost: Decimal,
    pub cost_lot_id: CostLotId,
    pub reference: Reference,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an outflow was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutflowApplied {
    pub key: StockKey,
    pub quantity: Decimal,
    pub removed_total_cost: Decimal,
    pub new_quantity: Decimal,
    pub reference: Reference,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a unit was converted and must be flagged as consumed.
///
/// The unit entity itself lives with the master-data layer; this is the
/// one-way `available -> consumed` transition it is asked to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConsumed {
    pub unit_id: ItemId,
    pub produced_item_id: ItemId,
    pub conversion_id: ConversionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    InflowApplied(InflowApplied),
    OutflowApplied(OutflowApplied),
    UnitConsumed(UnitConsumed),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::InflowApplied(_) => "inventory.stock.inflow_applied",
            StockEvent::OutflowApplied(_) => "inventory.stock.outflow_applied",
            StockEvent::UnitConsumed(_) => "inventory.unit.consumed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::InflowApplied(e) => e.occurred_at,
            StockEvent::OutflowApplied(e) => e.occurred_at,
            StockEvent::UnitConsumed(e) => e.occurred_at,
        }
    }
}
