//! FIFO cost lots.
//!
//! Lots are the audit trail of acquisitions: each inflow opens one, each
//! outflow consumes the oldest ones first. They run alongside the weighted
//! average on [`StockPosition`](crate::StockPosition) and never feed back
//! into it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use herdledger_core::{CostLotId, LedgerError, LedgerResult, Reference, round4};

use crate::key::StockKey;

/// One acquisition. Immutable apart from `remaining_qty`.
///
/// Invariant: `0 <= remaining_qty <= original_qty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLot {
    id: CostLotId,
    key: StockKey,
    reference: Reference,
    original_qty: Decimal,
    unit_cost: Decimal,
    total_cost: Decimal,
    remaining_qty: Decimal,
    created_at: DateTime<Utc>,
    /// Store-wide insertion sequence; breaks `created_at` ties.
    seq: u64,
}

impl CostLot {
    pub fn id(&self) -> CostLotId {
        self.id
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn original_qty(&self) -> Decimal {
        self.original_qty
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn total_cost(&self) -> Decimal {
        self.total_cost
    }

    pub fn remaining_qty(&self) -> Decimal {
        self.remaining_qty
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_qty.is_zero()
    }

    fn fifo_order(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// Part of one lot consumed by an outflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSlice {
    pub lot_id: CostLotId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Result of a FIFO consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoConsumption {
    /// `sum(slice.quantity * slice.unit_cost)`, rounded to four digits.
    pub removed_total_cost: Decimal,
    /// Oldest first.
    pub slices: Vec<LotSlice>,
}

/// Bookkeeping over the lots of a single key.
///
/// Only two operations mutate lots: [`open`](Self::open) on inflow and
/// [`consume_fifo`](Self::consume_fifo) on outflow.
#[derive(Debug)]
pub struct CostLotJournal<'a> {
    key: StockKey,
    lots: &'a mut Vec<CostLot>,
}

impl<'a> CostLotJournal<'a> {
    pub fn new(key: StockKey, lots: &'a mut Vec<CostLot>) -> Self {
        Self { key, lots }
    }

    /// Record a new acquisition with its full quantity remaining.
    pub fn open(
        &mut self,
        id: CostLotId,
        reference: Reference,
        qty: Decimal,
        unit_cost: Decimal,
        created_at: DateTime<Utc>,
        seq: u64,
    ) -> LedgerResult<&CostLot> {
        if qty <= Decimal::ZERO {
            return Err(LedgerError::validation("lot quantity must be > 0"));
        }
        if unit_cost < Decimal::ZERO {
            return Err(LedgerError::validation("lot unit cost must be >= 0"));
        }
        let total_cost = qty
            .checked_mul(unit_cost)
            .map(round4)
            .ok_or_else(|| LedgerError::validation("lot total cost overflow"))?;

        self.lots.push(CostLot {
            id,
            key: self.key,
            reference,
            original_qty: qty,
            unit_cost: round4(unit_cost),
            total_cost,
            remaining_qty: qty,
            created_at,
            seq,
        });
        Ok(&self.lots[self.lots.len() - 1])
    }

    /// Consume `qty` oldest-first, splitting the last lot touched if needed.
    ///
    /// The plan is computed before anything is written: if the lots cannot
    /// supply `qty`, nothing changes and `LedgerInconsistency` is returned.
    pub fn consume_fifo(&mut self, qty: Decimal) -> LedgerResult<FifoConsumption> {
        if qty <= Decimal::ZERO {
            return Err(LedgerError::validation("consumed quantity must be > 0"));
        }

        let mut order: Vec<usize> = (0..self.lots.len())
            .filter(|&i| self.lots[i].remaining_qty > Decimal::ZERO)
            .collect();
        order.sort_by_key(|&i| self.lots[i].fifo_order());

        let mut outstanding = qty;
        let mut plan: Vec<(usize, Decimal)> = Vec::new();
        for i in order {
            if outstanding.is_zero() {
                break;
            }
            let take = self.lots[i].remaining_qty.min(outstanding);
            plan.push((i, take));
            outstanding -= take;
        }

        if outstanding > Decimal::ZERO {
            return Err(LedgerError::inconsistency(format!(
                "cost lots for {} hold {} but {} was requested",
                self.key,
                qty - outstanding,
                qty
            )));
        }

        let mut removed = Decimal::ZERO;
        let mut slices = Vec::with_capacity(plan.len());
        for (i, take) in plan {
            let lot = &mut self.lots[i];
            lot.remaining_qty -= take;
            removed += take * lot.unit_cost;
            slices.push(LotSlice {
                lot_id: lot.id,
                quantity: take,
                unit_cost: lot.unit_cost,
            });
        }

        Ok(FifoConsumption {
            removed_total_cost: round4(removed),
            slices,
        })
    }

    /// Sum of `remaining_qty`; equals the position quantity when consistent.
    pub fn remaining(&self) -> Decimal {
        remaining(self.lots.as_slice())
    }
}

/// Sum of `remaining_qty` over a lot list.
pub fn remaining(lots: &[CostLot]) -> Decimal {
    lots.iter().map(|l| l.remaining_qty).sum()
}
