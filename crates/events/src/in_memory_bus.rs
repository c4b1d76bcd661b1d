//! In-memory event bus for tests/dev.
//!
//! Keeps every published message so a subscriber that starts late (or
//! restarts) can replay from an offset before following live traffic.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

#[derive(Debug)]
struct BusState<M> {
    log: Vec<M>,
    subscribers: Vec<mpsc::Sender<M>>,
}

/// In-memory pub/sub bus with a retained log.
///
/// - No IO / no async
/// - Publication and subscription share one lock, so a replaying subscriber
///   never misses or duplicates a message published concurrently
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    state: Mutex<BusState<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().map(|s| s.subscribers.len()).unwrap_or(0)
    }

    /// Number of messages published so far.
    pub fn published_count(&self) -> usize {
        self.state.lock().map(|s| s.log.len()).unwrap_or(0)
    }
}

impl<M: Clone> InMemoryEventBus<M> {
    /// Subscribe, first receiving every retained message from `offset` (0-based).
    pub fn subscribe_from(&self, offset: usize) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut state) = self.state.lock() {
            let backlog_ok = state
                .log
                .iter()
                .skip(offset)
                .all(|m| tx.send(m.clone()).is_ok());
            if backlog_ok {
                state.subscribers.push(tx);
            }
        }

        Subscription::new(rx)
    }

    /// Clone of everything published so far, in publication order.
    pub fn history(&self) -> Vec<M> {
        self.state.lock().map(|s| s.log.clone()).unwrap_or_default()
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            state: Mutex::new(BusState {
                log: Vec::new(),
                subscribers: Vec::new(),
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut state = self.state.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        state.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        state.log.push(message);

        Ok(())
    }

    /// Live messages only.
    fn subscribe(&self) -> Subscription<M> {
        self.subscribe_from(self.published_count())
    }
}
