//! Plain TCP plumbing between nodes
//!
//! Outbound block and heartbeat announcements, and the inbound listener that
//! feeds received transactions to the miner. Packages are JSON envelopes.

pub mod broadcaster;
pub mod server;

pub use broadcaster::{send_data, Broadcaster, NullBroadcaster, Package, TcpBroadcaster};
pub use server::{send_tx, Server, TX_COMMAND};
