//! Bundled [`TableClient`](crate::client::TableClient) implementations.

pub mod memory;

pub use memory::MemoryTableClient;
