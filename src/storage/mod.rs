//! Data storage and persistence
//!
//! The UTXO index kept next to the chain, and the in-memory backlog of
//! transactions waiting for a block.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::MemoryPool;
pub use utxo_set::{UTXOSet, UnspentOutput};
