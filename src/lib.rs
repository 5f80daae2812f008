//! # UTXO Ledger
//!
//! A single-chain proof-of-work ledger with a UTXO index, a transaction pool
//! and a mining node.
//!
//! ## Layout
//! - `core/`: blocks, transactions, merkle root, proof-of-work and the chain store
//! - `storage/`: the UTXO index and the pending-transaction pool
//! - `miner/`: the mining worker, heartbeat and shutdown token
//! - `network/`: TCP envelopes for blocks, heartbeats and incoming transactions
//! - `wallet/`: key pairs and base58check addresses
//! - `config/`: settings from defaults, TOML and the environment
//! - `utils/`: hashing, signatures and bincode helpers
//! - `cli/`: command-line definitions
//!
//! Blocks and UTXO entries live in sled; a block and its tip update commit
//! together, and the UTXO index can always be rebuilt from the chain.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod miner;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::Settings;
pub use core::{
    merkle_root, Block, Blockchain, BlockchainIterator, ProofOfWork, TXInput, TXOutput,
    Transaction,
};
pub use error::{LedgerError, Result};
pub use miner::{Miner, ShutdownToken};
pub use network::{send_tx, Broadcaster, NullBroadcaster, Server, TcpBroadcaster};
pub use storage::{MemoryPool, UTXOSet, UnspentOutput};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
