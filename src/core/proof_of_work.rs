use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::BigUint;
use std::ops::ShlAssign;

const MAX_NONCE: u64 = u64::MAX;

/// Hashcash puzzle over a block: find the first nonce whose
/// `SHA256(prev_hash ‖ merkle_root ‖ be64(nonce) ‖ be64(difficulty))` is below
/// `2^(256 - difficulty)`.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: BigUint,
    difficulty: u32,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block, difficulty: u32) -> Result<ProofOfWork<'a>> {
        let mut target = BigUint::from(1u8);
        target.shl_assign(256 - difficulty.min(256));
        Ok(ProofOfWork {
            merkle_root: block.hash_transactions()?,
            block,
            target,
            difficulty,
        })
    }

    pub fn get_target(&self) -> &BigUint {
        &self.target
    }

    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let pre_block_hash = self.block.get_pre_block_hash();
        let mut data_bytes = Vec::with_capacity(pre_block_hash.len() + self.merkle_root.len() + 16);
        data_bytes.extend(pre_block_hash);
        data_bytes.extend(self.merkle_root.as_slice());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(u64::from(self.difficulty).to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }

    /// Searches nonces upward from 0 and returns the first `(nonce, hash)` below target.
    pub fn run(&self) -> Result<(u64, Vec<u8>)> {
        debug!(
            "Mining block at height {} with difficulty {}",
            self.block.get_height(),
            self.difficulty
        );
        let mut nonce = 0;
        loop {
            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            if nonce == MAX_NONCE {
                return Err(LedgerError::NonceExhausted(self.difficulty));
            }
            nonce += 1;
        }
    }

    /// Recomputes the hash from the stored nonce and checks it against target
    /// and against the hash the block carries.
    pub fn validate(&self) -> bool {
        let hash = sha256_digest(self.prepare_data(self.block.get_nonce()).as_slice());
        self.meets_target(&hash) && hash.as_slice() == self.block.get_hash()
    }
}
