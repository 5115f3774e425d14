//! Application layer: the escrow ledger, the dispute engine built on it, and
//! the scheduler that drives both through time.
//!
//! Services own `Arc` handles to the storage ports and never hold entity
//! state of their own beyond per-entity locks.

pub mod disputes;
pub mod ledger;
pub mod locks;
pub mod scheduler;
