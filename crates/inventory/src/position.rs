use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use herdledger_core::{LedgerError, LedgerResult, round4};

use crate::key::StockKey;

/// Stock on hand for one key: running quantity and weighted-average cost.
///
/// `avg_cost` only changes on inflow. It is kept (not zeroed) when the
/// quantity drops to zero; the next inflow overwrites it because the old
/// quantity contributes nothing to the blend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosition {
    key: StockKey,
    quantity: Decimal,
    avg_cost: Decimal,
    /// Bumped on every write; used for the optimistic check at commit.
    version: u64,
    last_updated: DateTime<Utc>,
}

impl StockPosition {
    /// Zeroed position, as created on first touch.
    pub fn empty(key: StockKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            version: 0,
            last_updated: at,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn avg_cost(&self) -> Decimal {
        self.avg_cost
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Book value at the running average.
    pub fn value(&self) -> Decimal {
        round4(self.quantity * self.avg_cost)
    }

    /// State after receiving `qty` at `unit_cost`.
    ///
    /// `new_avg = (old_qty * old_avg + qty * unit_cost) / (old_qty + qty)`,
    /// rounded half-up to four digits.
    pub fn with_inflow(
        &self,
        qty: Decimal,
        unit_cost: Decimal,
        at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        validate_inflow(qty, unit_cost)?;

        let existing_cost = mul(self.quantity, self.avg_cost)?;
        let incoming_cost = mul(qty, unit_cost)?;
        let new_quantity = add(self.quantity, qty)?;
        let new_avg = round4(add(existing_cost, incoming_cost)? / new_quantity);

        Ok(Self {
            key: self.key,
            quantity: new_quantity,
            avg_cost: new_avg,
            version: self.version + 1,
            last_updated: at,
        })
    }

    /// State after issuing `qty`. The average cost is carried over untouched.
    pub fn with_outflow(&self, qty: Decimal, at: DateTime<Utc>) -> LedgerResult<Self> {
        validate_outflow(qty)?;

        if self.quantity < qty {
            return Err(LedgerError::InsufficientStock {
                key: self.key.to_string(),
                available: self.quantity,
                requested: qty,
            });
        }

        Ok(Self {
            key: self.key,
            quantity: self.quantity - qty,
            avg_cost: self.avg_cost,
            version: self.version + 1,
            last_updated: at,
        })
    }
}

/// Input checks for an inflow, run before anything is locked or touched.
pub fn validate_inflow(qty: Decimal, unit_cost: Decimal) -> LedgerResult<()> {
    if qty <= Decimal::ZERO {
        return Err(LedgerError::validation("inflow quantity must be > 0"));
    }
    if unit_cost < Decimal::ZERO {
        return Err(LedgerError::validation("unit cost must be >= 0"));
    }
    Ok(())
}

/// Input checks for an outflow, run before anything is locked or touched.
pub fn validate_outflow(qty: Decimal) -> LedgerResult<()> {
    if qty <= Decimal::ZERO {
        return Err(LedgerError::validation("outflow quantity must be > 0"));
    }
    Ok(())
}

fn mul(a: Decimal, b: Decimal) -> LedgerResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::validation(format!("amount overflow: {a} * {b}")))
}

fn add(a: Decimal, b: Decimal) -> LedgerResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::validation(format!("amount overflow: {a} + {b}")))
}
