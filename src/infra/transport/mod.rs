//! Transport implementations.

pub mod memory;

pub use memory::{InMemoryBus, InMemoryTransport};
