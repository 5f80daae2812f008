//! Mining node
//!
//! The long-running worker that turns pooled transactions into blocks, and
//! the token used to stop it.

#[allow(clippy::module_inception)]
pub mod miner;
pub mod shutdown;

pub use miner::{Miner, BLOCK_COMMAND, HEARTBEAT_COMMAND};
pub use shutdown::ShutdownToken;
