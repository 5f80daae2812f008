//! Core ledger functionality
//!
//! Blocks, transactions, the merkle commitment, proof-of-work and the
//! persistent chain of blocks.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use merkle::merkle_root;
pub use proof_of_work::ProofOfWork;
pub use transaction::{PrevTransactions, TXInput, TXOutput, Transaction, COINBASE_VOUT};
