//! Ledger events and their post-commit publication.
//!
//! Transactions buffer events in an outbox; the store publishes them through an
//! [`EventBus`] only after the transaction has committed.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{Event, EventEnvelope};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
