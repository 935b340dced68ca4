//! Infrastructure adapters for message transports.

pub mod transport;

pub use transport::{InMemoryBus, InMemoryTransport};
