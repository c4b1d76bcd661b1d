//! Configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use herdledger_accounting::AccountCodes;

pub const ENV_LOCK_TIMEOUT_MS: &str = "HERDLEDGER_LOCK_TIMEOUT_MS";
pub const ENV_ACCOUNT_PRODUCED_INVENTORY: &str = "HERDLEDGER_ACCOUNT_PRODUCED_INVENTORY";
pub const ENV_ACCOUNT_SOURCE_INVENTORY: &str = "HERDLEDGER_ACCOUNT_SOURCE_INVENTORY";
pub const ENV_ACCOUNT_PROCESSING_EXPENSE: &str = "HERDLEDGER_ACCOUNT_PROCESSING_EXPENSE";
pub const ENV_ACCOUNT_CASH_OR_PAYABLE: &str = "HERDLEDGER_ACCOUNT_CASH_OR_PAYABLE";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Ledger store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on waiting for a key lock before `LockTimeout`.
    pub lock_timeout_ms: u64,
    pub accounts: AccountCodes,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            accounts: AccountCodes::default(),
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Defaults overridden by `HERDLEDGER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.lock_timeout_ms = ms,
                _ => warn!(
                    var = ENV_LOCK_TIMEOUT_MS,
                    value = %raw,
                    "invalid lock timeout; using default"
                ),
            }
        }

        let accounts = &mut config.accounts;
        for (var, slot) in [
            (ENV_ACCOUNT_PRODUCED_INVENTORY, &mut accounts.produced_inventory),
            (ENV_ACCOUNT_SOURCE_INVENTORY, &mut accounts.source_inventory),
            (ENV_ACCOUNT_PROCESSING_EXPENSE, &mut accounts.processing_expense),
            (ENV_ACCOUNT_CASH_OR_PAYABLE, &mut accounts.cash_or_payable),
        ] {
            if let Some(raw) = lookup(var) {
                let code = raw.trim();
                if code.is_empty() {
                    warn!(var, "empty account code; using default");
                } else {
                    *slot = code.to_string();
                }
            }
        }

        config
    }
}
