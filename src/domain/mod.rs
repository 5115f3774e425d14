//! Domain layer: entities, value objects and the ports the application layer
//! depends on. Nothing here performs I/O.

pub mod clock;
pub mod dispute;
pub mod escrow;
pub mod ids;
pub mod invoice;
pub mod money;
pub mod ports;
