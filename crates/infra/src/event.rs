use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use herdledger_accounting::JournalEvent;
use herdledger_events::Event;
use herdledger_inventory::StockEvent;

/// Everything the store publishes after a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "module", content = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Stock(StockEvent),
    Journal(JournalEvent),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::Stock(e) => e.event_type(),
            LedgerEvent::Journal(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            LedgerEvent::Stock(e) => e.version(),
            LedgerEvent::Journal(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::Stock(e) => e.occurred_at(),
            LedgerEvent::Journal(e) => e.occurred_at(),
        }
    }
}

impl From<StockEvent> for LedgerEvent {
    fn from(value: StockEvent) -> Self {
        LedgerEvent::Stock(value)
    }
}

impl From<JournalEvent> for LedgerEvent {
    fn from(value: JournalEvent) -> Self {
        LedgerEvent::Journal(value)
    }
}
