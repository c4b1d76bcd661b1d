use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herdledger_core::TransactionId;

/// A committed ledger fact: immutable, versioned, stamped by the ledger clock.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. "inventory.stock.inflow_applied".
    fn event_type(&self) -> &'static str;

    /// Schema version of this event type.
    fn version(&self) -> u32;

    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Envelope for a committed ledger event.
///
/// Notes:
/// - `transaction_id` groups the events of one atomic ledger operation.
/// - `sequence_number` is the store-wide publication order (1-based, no gaps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    transaction_id: TransactionId,
    event_type: String,

    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        transaction_id: TransactionId,
        event_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            transaction_id,
            event_type: event_type.into(),
            sequence_number,
            payload,
        }
    }

    /// Envelope with a fresh v7 id and the payload's own type name.
    pub fn wrap(transaction_id: TransactionId, sequence_number: u64, payload: E) -> Self
    where
        E: Event,
    {
        Self::new(
            Uuid::now_v7(),
            transaction_id,
            payload.event_type(),
            sequence_number,
            payload,
        )
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-encode the payload as JSON (for transports that carry untyped payloads).
    pub fn to_json(&self) -> Result<EventEnvelope<serde_json::Value>, serde_json::Error>
    where
        E: Serialize,
    {
        Ok(EventEnvelope {
            event_id: self.event_id,
            transaction_id: self.transaction_id,
            event_type: self.event_type.clone(),
            sequence_number: self.sequence_number,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}
