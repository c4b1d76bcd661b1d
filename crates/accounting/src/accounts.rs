use serde::{Deserialize, Serialize};

/// Account codes the conversion posts to.
///
/// Supplied by configuration; the defaults match the chart of accounts the
/// farm backend ships with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountCodes {
    /// Asset account for the produced item (e.g. processed meat).
    pub produced_inventory: String,
    /// Asset account for the consumed unit (live animals).
    pub source_inventory: String,
    /// Expense account for conversion/processing fees.
    pub processing_expense: String,
    /// Where processing fees are paid from (cash or accounts payable).
    pub cash_or_payable: String,
}

impl Default for AccountCodes {
    fn default() -> Self {
        Self {
            produced_inventory: "MEAT-INV".to_string(),
            source_inventory: "LIVESTOCK-INV".to_string(),
            processing_expense: "PROCESSING-EXP".to_string(),
            cash_or_payable: "CASH-OR-AP".to_string(),
        }
    }
}
