//! Slaughter conversion: one live unit becomes a quantity of processed product.
//!
//! The outflow, the inflow, the conversion record, the consumed flag and the
//! journal entry are staged in the caller's transaction and land together on
//! commit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use herdledger_accounting::{AccountCodes, JournalLine, NewJournalEntry};
use herdledger_core::{
    ConversionId, ItemId, JournalEntryId, LedgerError, LedgerResult, LocationId, Reference, round4,
};
use herdledger_inventory::{StockEvent, StockKey, UnitConsumed};

use super::journal::DoubleEntryLedger;
use super::stock::{Inflow, Outflow, issue, receive};
use crate::config::LedgerConfig;
use crate::store::Transaction;

/// Reference kind on every row a conversion writes.
pub const SLAUGHTER_KIND: &str = "slaughter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertUnit {
    pub unit_id: ItemId,
    pub produced_item_id: ItemId,
    pub location_id: Option<LocationId>,
    pub produced_qty: Decimal,
    pub processing_fee: Decimal,
}

/// Immutable link from a consumed unit to what it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub id: ConversionId,
    pub unit_id: ItemId,
    pub produced_item_id: ItemId,
    pub location_id: Option<LocationId>,
    pub produced_qty: Decimal,
    pub unit_cost: Decimal,
    pub removed_cost: Decimal,
    pub processing_fee: Decimal,
    /// Unit's average cost before the outflow. Informational.
    pub book_value: Decimal,
    pub journal_entry_id: JournalEntryId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub conversion_id: ConversionId,
    pub unit_id: ItemId,
    pub produced_item_id: ItemId,
    pub produced_qty: Decimal,
    pub book_value: Decimal,
    pub removed_cost: Decimal,
    pub unit_cost: Decimal,
    pub journal_entry_id: JournalEntryId,
}

#[derive(Debug, Clone, Default)]
pub struct SlaughterConverter {
    accounts: AccountCodes,
}

impl SlaughterConverter {
    pub fn new(accounts: AccountCodes) -> Self {
        Self { accounts }
    }

    /// Post to the account codes the store was configured with.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.accounts.clone())
    }

    pub fn accounts(&self) -> &AccountCodes {
        &self.accounts
    }

    #[instrument(
        skip_all,
        fields(
            tx = %tx.id(),
            unit = %request.unit_id,
            produced_item = %request.produced_item_id,
            qty = %request.produced_qty,
            fee = %request.processing_fee
        )
    )]
    pub fn convert(&self, tx: &mut Transaction, request: ConvertUnit) -> LedgerResult<ConversionOutcome> {
        tx.ensure_open()?;
        if request.produced_qty <= Decimal::ZERO {
            return Err(LedgerError::validation("produced quantity must be > 0"));
        }
        if request.processing_fee < Decimal::ZERO {
            return Err(LedgerError::validation("processing fee must be >= 0"));
        }
        if request.unit_id == request.produced_item_id {
            return Err(LedgerError::validation(
                "unit and produced item must be different items",
            ));
        }

        tx.run(|tx| self.convert_locked(tx, request))
    }

    fn convert_locked(&self, tx: &mut Transaction, request: ConvertUnit) -> LedgerResult<ConversionOutcome> {
        let ConvertUnit {
            unit_id,
            produced_item_id,
            location_id,
            produced_qty,
            processing_fee,
        } = request;
        let conversion_id = ConversionId::new();
        let journal_entry_id = JournalEntryId::new();
        let reference = Reference::new(SLAUGHTER_KIND, conversion_id);

        let unit_key = StockKey::livestock(unit_id, location_id);
        let produced_key = StockKey::inventory_item(produced_item_id, location_id);
        tx.lock_stock(&[unit_key, produced_key])?;

        let unit = tx.position_or_empty(unit_key)?;
        if tx.is_consumed(unit_id)? || unit.quantity() < Decimal::ONE {
            return Err(LedgerError::UnitNotAvailable {
                unit: unit_id.to_string(),
                available: unit.quantity(),
            });
        }
        let book_value = unit.avg_cost();

        let removed_cost = issue(
            tx,
            Outflow {
                key: unit_key,
                quantity: Decimal::ONE,
                reference: reference.clone(),
            },
        )?
        .removed_total_cost;

        let unit_cost = round4((removed_cost + processing_fee) / produced_qty);
        receive(
            tx,
            Inflow {
                key: produced_key,
                quantity: produced_qty,
                unit_cost,
                reference: reference.clone(),
            },
        )?;

        let now = tx.now();
        tx.push_conversion(ConversionRecord {
            id: conversion_id,
            unit_id,
            produced_item_id,
            location_id,
            produced_qty,
            unit_cost,
            removed_cost,
            processing_fee,
            book_value,
            journal_entry_id,
            created_at: now,
        });
        tx.mark_consumed(unit_id);
        tx.emit(StockEvent::UnitConsumed(UnitConsumed {
            unit_id,
            produced_item_id,
            conversion_id,
            occurred_at: now,
        }));

        DoubleEntryLedger::record_as(
            tx,
            journal_entry_id,
            NewJournalEntry {
                date: now.date_naive(),
                description: format!("Slaughter of unit {unit_id}"),
                lines: self.journal_lines(removed_cost, processing_fee),
                reference,
            },
        )?;

        debug!(%conversion_id, %removed_cost, %unit_cost, "conversion staged");

        Ok(ConversionOutcome {
            conversion_id,
            unit_id,
            produced_item_id,
            produced_qty,
            book_value,
            removed_cost,
            unit_cost,
            journal_entry_id,
        })
    }

    /// Produced inventory picks up the unit's cost plus the fee. The fee is
    /// paid out and, in the same entry, absorbed from expense into inventory.
    fn journal_lines(&self, removed_cost: Decimal, fee: Decimal) -> Vec<JournalLine> {
        let accounts = &self.accounts;
        let mut lines = vec![
            JournalLine::debit(
                &accounts.produced_inventory,
                removed_cost + fee,
                "produced inventory at cost",
            ),
            JournalLine::credit(&accounts.source_inventory, removed_cost, "unit removed at cost"),
        ];
        if fee > Decimal::ZERO {
            lines.push(JournalLine::debit(&accounts.processing_expense, fee, "processing fee"));
            lines.push(JournalLine::credit(&accounts.cash_or_payable, fee, "processing fee"));
            lines.push(JournalLine::credit(
                &accounts.processing_expense,
                fee,
                "processing fee absorbed into inventory",
            ));
        }
        lines
    }
}
