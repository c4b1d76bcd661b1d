//! Ledger services. Each one works inside a caller-supplied [`Transaction`](crate::Transaction).

pub mod conversion;
pub mod journal;
pub mod stock;
