use crate::core::{merkle_root, ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    timestamp: i64,
    transactions: Vec<Transaction>,
    hash: Vec<u8>,
    pre_block_hash: Vec<u8>, // empty for genesis
    nonce: u64,
    height: u64,
}

impl Block {
    /// An unsealed block: no nonce search has run yet.
    pub fn new_candidate(
        pre_block_hash: Vec<u8>,
        transactions: Vec<Transaction>,
        height: u64,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        Ok(Block {
            timestamp: current_timestamp()?,
            transactions,
            hash: vec![],
            pre_block_hash,
            nonce: 0,
            height,
        })
    }

    /// Builds a candidate and runs proof-of-work on it.
    pub fn mine(
        pre_block_hash: Vec<u8>,
        transactions: Vec<Transaction>,
        height: u64,
        difficulty: u32,
    ) -> Result<Block> {
        let mut block = Block::new_candidate(pre_block_hash, transactions, height)?;
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block, difficulty)?.run()?;
        block.seal(nonce, hash);
        info!(
            "Proof-of-work completed for block {} at height {height} (nonce {nonce})",
            block.get_hash_hex()
        );
        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: Transaction, difficulty: u32) -> Result<Block> {
        if !coinbase.is_coinbase() {
            return Err(LedgerError::InvalidBlock(
                "Genesis block must carry a coinbase transaction".to_string(),
            ));
        }
        Block::mine(vec![], vec![coinbase], 0, difficulty)
    }

    pub(crate) fn seal(&mut self, nonce: u64, hash: Vec<u8>) {
        self.nonce = nonce;
        self.hash = hash;
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(self.hash.as_slice())
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Merkle root over the ordered transaction ids.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let ids: Vec<Vec<u8>> = self
            .transactions
            .iter()
            .map(|tx| tx.get_id().to_vec())
            .collect();
        merkle_root(&ids)
    }
}
