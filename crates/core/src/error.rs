//! Ledger error model.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every variant aborts the enclosing transaction. Keys are carried in their
/// display form so the error stays independent of the domain crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed input (non-positive quantity, negative cost, empty journal, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An outflow asked for more than the position holds.
    #[error("insufficient stock for {key}: have {available}, need {requested}")]
    InsufficientStock {
        key: String,
        available: Decimal,
        requested: Decimal,
    },

    /// Cost lots disagree with the stock position. Signals corrupted data.
    #[error("ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    /// Journal lines do not balance after rounding.
    #[error("journal entry not balanced: debit={debit} credit={credit}")]
    UnbalancedEntry { debit: Decimal, credit: Decimal },

    /// A conversion was requested on a unit that is not on hand.
    #[error("unit {unit} not available (have {available})")]
    UnitNotAvailable { unit: String, available: Decimal },

    /// A key lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout { key: String, waited: Duration },

    /// A committed row changed underneath the transaction (stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal storage failure (e.g. poisoned lock).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::LedgerInconsistency(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Transient contention: the caller may retry the whole transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Conflict(_))
    }

    /// Integrity failures that must never be retried or masked.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LedgerInconsistency(_) | Self::Storage(_))
    }

    /// Stable category name surfaced at the CRUD boundary.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::LedgerInconsistency(_) => "ledger_inconsistency",
            Self::UnbalancedEntry { .. } => "unbalanced_entry",
            Self::UnitNotAvailable { .. } => "unit_not_available",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        }
    }
}
