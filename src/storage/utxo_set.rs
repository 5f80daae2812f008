use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Batch, Tree};

const UTXO_TREE: &str = "chainstate";
const UTXO_KEY_PREFIX: &[u8] = b"utxo-";

/// An output that no committed transaction consumes yet, with its position
/// in the producing transaction.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutput {
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// Derived index of unspent outputs, keyed `utxo-` ‖ txid in the chainstate tree.
/// It can always be rebuilt from the chain with [`UTXOSet::reindex`].
pub struct UTXOSet {
    blockchain: Blockchain,
}

fn utxo_key(txid: &[u8]) -> Vec<u8> {
    [UTXO_KEY_PREFIX, txid].concat()
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.blockchain.open_tree(UTXO_TREE)
    }

    /// Decoded index contents ordered by key.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<UnspentOutput>)>> {
        let mut entries = vec![];
        for item in self.utxo_tree()?.scan_prefix(UTXO_KEY_PREFIX) {
            let (key, value) = item?;
            let txid = key[UTXO_KEY_PREFIX.len()..].to_vec();
            entries.push((txid, deserialize::<Vec<UnspentOutput>>(value.as_ref())?));
        }
        Ok(entries)
    }

    /// Collects outputs locked to `pub_key_hash`, in index order, until their
    /// total reaches `amount`. Returns the total and the `(txid, index)` pairs.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<(Vec<u8>, usize)>)> {
        let mut spendable = vec![];
        let mut accumulated: u64 = 0;

        'scan: for (txid, outputs) in self.entries()? {
            for unspent in outputs {
                if accumulated >= amount {
                    break 'scan;
                }
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(unspent.output.get_value());
                    spendable.push((txid.clone(), unspent.index));
                }
            }
        }
        Ok((accumulated, spendable))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        Ok(self
            .entries()?
            .into_iter()
            .flat_map(|(_, outputs)| outputs)
            .filter(|unspent| unspent.output.is_locked_with_key(pub_key_hash))
            .map(|unspent| unspent.output)
            .collect())
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Number of transactions that still have at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        let mut counter = 0;
        for item in self.utxo_tree()?.scan_prefix(UTXO_KEY_PREFIX) {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Replaces the whole index with one derived from the committed chain.
    /// The old entries are dropped and the new ones written in a single batch.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        let mut batch = Batch::default();
        for item in utxo_tree.scan_prefix(UTXO_KEY_PREFIX) {
            let (key, _) = item?;
            batch.remove(key);
        }
        for (txid, outputs) in &utxo_map {
            batch.insert(utxo_key(txid), serialize(outputs)?);
        }
        utxo_tree.apply_batch(batch)?;
        utxo_tree.flush()?;

        info!("UTXO index rebuilt with {} transactions", utxo_map.len());
        Ok(())
    }

    /// Applies one committed block: removes the outputs its inputs consume and
    /// adds every output it creates. All changes land in one transaction.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let mut created = Vec::with_capacity(block.get_transactions().len());
        for tx in block.get_transactions() {
            let outputs: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                .collect();
            created.push(if outputs.is_empty() {
                None
            } else {
                Some(serialize(&outputs)?)
            });
        }

        utxo_tree.transaction(|tx_db| -> ConflictableTransactionResult<(), LedgerError> {
            for (tx, new_entry) in block.get_transactions().iter().zip(&created) {
                if !tx.is_coinbase() {
                    for vin in tx.get_vin() {
                        let key = utxo_key(vin.get_txid());
                        let stored = tx_db.get(&key)?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(LedgerError::Database(format!(
                                "output {}:{} is not in the UTXO index",
                                HEXLOWER.encode(vin.get_txid()),
                                vin.get_vout()
                            )))
                        })?;
                        let mut outputs: Vec<UnspentOutput> = deserialize(stored.as_ref())
                            .map_err(ConflictableTransactionError::Abort)?;
                        outputs.retain(|unspent| Some(unspent.index) != vin.output_index());

                        if outputs.is_empty() {
                            tx_db.remove(key)?;
                        } else {
                            let encoded =
                                serialize(&outputs).map_err(ConflictableTransactionError::Abort)?;
                            tx_db.insert(key, encoded)?;
                        }
                    }
                }
                if let Some(entry) = new_entry {
                    tx_db.insert(utxo_key(tx.get_id()), entry.as_slice())?;
                }
            }
            Ok(())
        })?;
        utxo_tree.flush()?;

        debug!(
            "UTXO index updated with block {} at height {}",
            block.get_hash_hex(),
            block.get_height()
        );
        Ok(())
    }
}
