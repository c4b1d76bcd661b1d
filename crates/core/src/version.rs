//! Optimistic version checks on stock positions.
//!
//! Key locks serialize writers; the version column is the second line that
//! catches a committed row changing between first touch and commit.

use crate::error::{LedgerError, LedgerResult};

/// Optimistic concurrency expectation for a stored row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Row must not exist yet.
    Absent,
    /// Row must be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> LedgerResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "optimistic version check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
