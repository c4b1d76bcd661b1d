//! Stock ledger: quantity and cost per (item type, item, location).
//!
//! Every write updates three things together under the key's lock: the
//! weighted-average position, the FIFO cost lots, and the movement history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use herdledger_core::{
    CostLotId, ItemId, LedgerError, LedgerResult, LocationId, MovementId, Reference, round4,
};
use herdledger_inventory::{
    CostLotJournal, InflowApplied, ItemType, LotSlice, MovementDirection, OutflowApplied,
    StockEvent, StockKey, StockMovement, StockPosition, validate_inflow, validate_outflow,
};

use crate::store::Transaction;

/// Receive `quantity` at `unit_cost`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inflow {
    pub key: StockKey,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub reference: Reference,
}

/// Issue `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outflow {
    pub key: StockKey,
    pub quantity: Decimal,
    pub reference: Reference,
}

/// Move `quantity` of one item between locations, carrying its FIFO cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub item_type: ItemType,
    pub item_id: ItemId,
    pub from: Option<LocationId>,
    pub to: Option<LocationId>,
    pub quantity: Decimal,
    pub reference: Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflowOutcome {
    pub key: StockKey,
    pub new_quantity: Decimal,
    pub new_avg_cost: Decimal,
    pub cost_lot_id: CostLotId,
    pub movement_id: MovementId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutflowOutcome {
    pub key: StockKey,
    /// FIFO cost relieved from the lots.
    pub removed_total_cost: Decimal,
    /// Running average at the time of issue (unchanged by the outflow).
    pub avg_cost_used: Decimal,
    pub new_quantity: Decimal,
    pub slices: Vec<LotSlice>,
    pub movement_id: MovementId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub outflow: OutflowOutcome,
    pub inflow: InflowOutcome,
}

/// Stateless service over the stock tables of a [`Transaction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StockLedger;

impl StockLedger {
    /// Locking read; a key seen for the first time gets a zero position.
    #[instrument(skip_all, fields(tx = %tx.id(), key = %key))]
    pub fn get_or_create(tx: &mut Transaction, key: StockKey) -> LedgerResult<StockPosition> {
        tx.run(|tx| {
            let (position, created) = tx.ensure_position(key)?;
            if created {
                debug!("created empty stock position");
            }
            Ok(position)
        })
    }

    #[instrument(
        skip_all,
        fields(tx = %tx.id(), key = %inflow.key, qty = %inflow.quantity, unit_cost = %inflow.unit_cost)
    )]
    pub fn apply_inflow(tx: &mut Transaction, inflow: Inflow) -> LedgerResult<InflowOutcome> {
        tx.ensure_open()?;
        validate_inflow(inflow.quantity, inflow.unit_cost)?;
        tx.run(|tx| receive(tx, inflow))
    }

    #[instrument(
        skip_all,
        fields(tx = %tx.id(), key = %outflow.key, qty = %outflow.quantity)
    )]
    pub fn apply_outflow(tx: &mut Transaction, outflow: Outflow) -> LedgerResult<OutflowOutcome> {
        tx.ensure_open()?;
        validate_outflow(outflow.quantity)?;
        tx.run(|tx| issue(tx, outflow))
    }

    /// Outflow at `from` followed by an inflow at `to` at the relieved unit cost.
    #[instrument(
        skip_all,
        fields(tx = %tx.id(), item = %transfer.item_id, qty = %transfer.quantity)
    )]
    pub fn transfer(tx: &mut Transaction, transfer: Transfer) -> LedgerResult<TransferOutcome> {
        tx.ensure_open()?;
        validate_outflow(transfer.quantity)?;
        if transfer.from == transfer.to {
            return Err(LedgerError::validation(
                "transfer source and destination must differ",
            ));
        }

        let source = StockKey::new(transfer.item_type, transfer.item_id, transfer.from);
        let destination = source.at(transfer.to);

        tx.run(|tx| {
            tx.lock_stock(&[source, destination])?;

            let outflow = issue(
                tx,
                Outflow {
                    key: source,
                    quantity: transfer.quantity,
                    reference: transfer.reference.clone(),
                },
            )?;
            let unit_cost = round4(outflow.removed_total_cost / transfer.quantity);
            let inflow = receive(
                tx,
                Inflow {
                    key: destination,
                    quantity: transfer.quantity,
                    unit_cost,
                    reference: transfer.reference,
                },
            )?;

            Ok(TransferOutcome { outflow, inflow })
        })
    }
}

pub(crate) fn receive(tx: &mut Transaction, inflow: Inflow) -> LedgerResult<InflowOutcome> {
    let Inflow {
        key,
        quantity,
        unit_cost,
        reference,
    } = inflow;
    let now = tx.now();

    let current = tx.position_or_empty(key)?;
    let updated = current.with_inflow(quantity, unit_cost, now)?;

    let lot_id = CostLotId::new();
    let seq = tx.next_lot_seq();
    let lot_total = {
        let mut lots = CostLotJournal::new(key, tx.lots_mut(key)?);
        lots.open(lot_id, reference.clone(), quantity, unit_cost, now, seq)?
            .total_cost()
    };

    let movement_id = MovementId::new();
    tx.push_movement(StockMovement {
        id: movement_id,
        key,
        direction: MovementDirection::In,
        quantity,
        unit_cost: round4(unit_cost),
        total_cost: lot_total,
        reference: reference.clone(),
        occurred_at: now,
    });
    tx.emit(StockEvent::InflowApplied(InflowApplied {
        key,
        quantity,
        unit_cost: round4(unit_cost),
        new_quantity: updated.quantity(),
        new_avg_cost: updated.avg_cost(),
        cost_lot_id: lot_id,
        reference,
        occurred_at: now,
    }));

    let outcome = InflowOutcome {
        key,
        new_quantity: updated.quantity(),
        new_avg_cost: updated.avg_cost(),
        cost_lot_id: lot_id,
        movement_id,
    };
    tx.put_position(updated)?;
    Ok(outcome)
}

pub(crate) fn issue(tx: &mut Transaction, outflow: Outflow) -> LedgerResult<OutflowOutcome> {
    let Outflow {
        key,
        quantity,
        reference,
    } = outflow;
    let now = tx.now();

    let current = tx.position_or_empty(key)?;
    let updated = current.with_outflow(quantity, now)?;

    let consumption = CostLotJournal::new(key, tx.lots_mut(key)?).consume_fifo(quantity)?;

    let movement_id = MovementId::new();
    tx.push_movement(StockMovement {
        id: movement_id,
        key,
        direction: MovementDirection::Out,
        quantity,
        unit_cost: current.avg_cost(),
        total_cost: consumption.removed_total_cost,
        reference: reference.clone(),
        occurred_at: now,
    });
    tx.emit(StockEvent::OutflowApplied(OutflowApplied {
        key,
        quantity,
        removed_total_cost: consumption.removed_total_cost,
        new_quantity: updated.quantity(),
        reference,
        occurred_at: now,
    }));

    let outcome = OutflowOutcome {
        key,
        removed_total_cost: consumption.removed_total_cost,
        avg_cost_used: current.avg_cost(),
        new_quantity: updated.quantity(),
        slices: consumption.slices,
        movement_id,
    };
    tx.put_position(updated)?;
    Ok(outcome)
}
