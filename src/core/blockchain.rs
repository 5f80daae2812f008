// The ledger store: an append-only chain of blocks in sled, keyed by block
// hash, plus the tip hash under a distinguished key. Every state transition
// runs inside a single sled transaction.

use crate::config::Settings;
use crate::core::transaction::PrevTransactions;
use crate::core::{Block, ProofOfWork, TXOutput, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::UnspentOutput;
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "lh";
const BLOCKS_TREE: &str = "blocks";
const GENESIS_MEMO: &str = "First Transaction from Genesis";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>, // cached copy of the persisted tip
    db: Db,
    db_path: PathBuf,
    difficulty: u32,
    block_reward: u64,
    write_lock: Arc<Mutex<()>>, // one in-flight block insertion per process
    closed: Arc<AtomicBool>,
}

fn abort<T>(err: LedgerError) -> ConflictableTransactionResult<T, LedgerError> {
    Err(ConflictableTransactionError::Abort(err))
}

impl Blockchain {
    pub fn init_from_settings(genesis_address: &str, settings: &Settings) -> Result<Blockchain> {
        Self::init_blockchain(
            genesis_address,
            &settings.blocks_dir(),
            settings.difficulty,
            settings.block_reward,
        )
    }

    pub fn continue_from_settings(settings: &Settings) -> Result<Blockchain> {
        Self::continue_blockchain(
            &settings.blocks_dir(),
            settings.difficulty,
            settings.block_reward,
        )
    }

    /// Creates a new chain whose genesis block rewards `genesis_address`.
    /// If anything fails, no chain is left behind at `db_path`.
    pub fn init_blockchain(
        genesis_address: &str,
        db_path: &Path,
        difficulty: u32,
        block_reward: u64,
    ) -> Result<Blockchain> {
        let existed = db_path.exists();
        let db = sled::open(db_path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        if blocks_tree.contains_key(TIP_BLOCK_HASH_KEY)? {
            return Err(LedgerError::AlreadyExists);
        }

        match Self::write_genesis(&db, &blocks_tree, genesis_address, difficulty, block_reward) {
            Ok(tip_hash) => Ok(Blockchain {
                tip_hash: Arc::new(RwLock::new(tip_hash)),
                db,
                db_path: db_path.to_path_buf(),
                difficulty,
                block_reward,
                write_lock: Arc::new(Mutex::new(())),
                closed: Arc::new(AtomicBool::new(false)),
            }),
            Err(e) => {
                drop(blocks_tree);
                drop(db);
                if !existed {
                    if let Err(cleanup) = fs::remove_dir_all(db_path) {
                        warn!("Failed to remove partial chain at {}: {cleanup}", db_path.display());
                    }
                }
                Err(e)
            }
        }
    }

    fn write_genesis(
        db: &Db,
        blocks_tree: &Tree,
        genesis_address: &str,
        difficulty: u32,
        block_reward: u64,
    ) -> Result<Vec<u8>> {
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_MEMO, block_reward)?;
        let genesis = Block::generate_genesis_block(coinbase_tx, difficulty)?;
        let genesis_data = genesis.serialize()?;

        blocks_tree.transaction(|tx_db| -> ConflictableTransactionResult<(), LedgerError> {
            tx_db.insert(genesis.get_hash(), genesis_data.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, genesis.get_hash())?;
            Ok(())
        })?;
        db.flush()?;

        info!(
            "Genesis block {} created for {genesis_address}",
            genesis.get_hash_hex()
        );
        Ok(genesis.get_hash().to_vec())
    }

    /// Opens an existing chain and loads its tip.
    pub fn continue_blockchain(
        db_path: &Path,
        difficulty: u32,
        block_reward: u64,
    ) -> Result<Blockchain> {
        if !db_path.exists() {
            return Err(LedgerError::NotFound);
        }
        let db = sled::open(db_path)?;
        let tip_hash = db
            .open_tree(BLOCKS_TREE)?
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or(LedgerError::NotFound)?
            .to_vec();

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            db_path: db_path.to_path_buf(),
            difficulty,
            block_reward,
            write_lock: Arc::new(Mutex::new(())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flushes and releases the store. Only the first call across all clones
    /// does anything; every later operation fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.flush()?;
        info!("Ledger store at {} closed", self.db_path.display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn open_tree(&self, name: &str) -> Result<Tree> {
        if self.is_closed() {
            return Err(LedgerError::Database("ledger store is closed".to_string()));
        }
        Ok(self.db.open_tree(name)?)
    }

    fn blocks_tree(&self) -> Result<Tree> {
        self.open_tree(BLOCKS_TREE)
    }

    pub fn get_db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_block_reward(&self) -> u64 {
        self.block_reward
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self.tip_hash.write().unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    /// Appends `block` on top of the current tip. Re-adding a stored block is a no-op.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        if !ProofOfWork::new_proof_of_work(block, self.difficulty)?.validate() {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} does not solve difficulty {}",
                block.get_hash_hex(),
                self.difficulty
            )));
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let blocks_tree = self.blocks_tree()?;
        let block_data = block.serialize()?;

        let inserted = blocks_tree.transaction(|tx_db| -> ConflictableTransactionResult<bool, LedgerError> {
            if tx_db.get(block.get_hash())?.is_some() {
                return Ok(false);
            }

            let tip_hash = match tx_db.get(TIP_BLOCK_HASH_KEY)? {
                Some(hash) => hash,
                None => return abort(LedgerError::NotFound),
            };
            let tip_block = match tx_db.get(&tip_hash)? {
                Some(bytes) => Block::deserialize(bytes.as_ref())
                    .map_err(ConflictableTransactionError::Abort)?,
                None => {
                    return abort(LedgerError::Database(format!(
                        "tip block {} is missing",
                        HEXLOWER.encode(&tip_hash)
                    )))
                }
            };

            if block.get_height() != tip_block.get_height() + 1 {
                return abort(LedgerError::BlockHeightInvalid {
                    expected: tip_block.get_height() + 1,
                    actual: block.get_height(),
                });
            }
            if block.get_pre_block_hash() != tip_block.get_hash() {
                return abort(LedgerError::BlockPrevHashInvalid {
                    tip: tip_block.get_hash_hex(),
                    prev: HEXLOWER.encode(block.get_pre_block_hash()),
                });
            }

            tx_db.insert(block.get_hash(), block_data.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
            Ok(true)
        })?;

        if inserted {
            self.db.flush()?;
            self.set_tip_hash(block.get_hash());
            info!(
                "Added block {} at height {}",
                block.get_hash_hex(),
                block.get_height()
            );
        } else {
            debug!("Block {} already stored", block.get_hash_hex());
        }
        Ok(())
    }

    /// Verifies `transactions`, seals them into a block on top of the tip and appends it.
    /// The batch must end with its one and only coinbase.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        Self::check_coinbase_placement(&transactions)?;
        for transaction in &transactions {
            if !self.verify_transaction(transaction)? {
                return Err(LedgerError::TransactionInvalid(transaction.get_id_hex()));
            }
        }
        Self::check_for_double_spending(&transactions)?;

        let tip_hash = self.get_tip_hash();
        let tip_block = self.get_block(&tip_hash)?.ok_or_else(|| {
            LedgerError::Database(format!("tip block {} is missing", HEXLOWER.encode(&tip_hash)))
        })?;
        let next_height = tip_block.get_height() + 1;

        info!(
            "Mining block at height {next_height} with {} transactions",
            transactions.len()
        );
        let block = Block::mine(tip_hash, transactions, next_height, self.difficulty)?;
        self.add_block(&block)?;
        Ok(block)
    }

    fn check_coinbase_placement(transactions: &[Transaction]) -> Result<()> {
        let coinbases = transactions.iter().filter(|tx| tx.is_coinbase()).count();
        match transactions.last() {
            Some(last) if coinbases == 1 && last.is_coinbase() => Ok(()),
            _ => Err(LedgerError::InvalidBlock(format!(
                "expected exactly one coinbase as the last transaction, found {coinbases}"
            ))),
        }
    }

    // two transactions in one batch sharing an id or claiming the same output
    fn check_for_double_spending(transactions: &[Transaction]) -> Result<()> {
        let mut ids: HashSet<&[u8]> = HashSet::new();
        let mut spent_outputs: HashSet<(&[u8], i64)> = HashSet::new();
        for transaction in transactions {
            if !ids.insert(transaction.get_id()) {
                warn!("Transaction {} appears twice in one batch", transaction.get_id_hex());
                return Err(LedgerError::TransactionInvalid(transaction.get_id_hex()));
            }
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                if !spent_outputs.insert((input.get_txid(), input.get_vout())) {
                    warn!(
                        "Output {}:{} spent twice in one batch",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    );
                    return Err(LedgerError::TransactionInvalid(transaction.get_id_hex()));
                }
            }
        }
        Ok(())
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator::new(
            self.get_tip_hash(),
            self.blocks_tree()?,
        ))
    }

    pub fn get_best_height(&self) -> Result<u64> {
        let tip_hash = self.get_tip_hash();
        self.get_block(&tip_hash)?
            .map(|block| block.get_height())
            .ok_or_else(|| LedgerError::Database("tip block is missing".to_string()))
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        match self.blocks_tree()?.get(block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Linear scan from tip to genesis.
    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator()? {
            if let Some(transaction) = block?
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(transaction.clone());
            }
        }
        Err(LedgerError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    pub fn contains_transaction(&self, txid: &[u8]) -> Result<bool> {
        match self.find_transaction(txid) {
            Ok(_) => Ok(true),
            Err(LedgerError::TransactionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn find_referenced_transactions(&self, transaction: &Transaction) -> Result<PrevTransactions> {
        let mut prev_txs = PrevTransactions::new();
        for input in transaction.get_vin() {
            if !prev_txs.contains_key(input.get_txid()) {
                let prev_tx = self.find_transaction(input.get_txid())?;
                prev_txs.insert(prev_tx.get_id().to_vec(), prev_tx);
            }
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, transaction: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = match self.find_referenced_transactions(transaction) {
            Ok(prev_txs) => prev_txs,
            Err(LedgerError::TransactionNotFound(txid)) => {
                return Err(LedgerError::TransactionSignFailed(format!(
                    "referenced transaction {txid} not found"
                )))
            }
            Err(e) => return Err(e),
        };
        transaction.sign(pkcs8, &prev_txs)
    }

    /// Id, signature, ownership, value conservation and unspent checks against the
    /// committed chain. A coinbase must pay exactly the block reward in one output.
    /// Storage failures surface as errors, everything else as `false`.
    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        if transaction.get_id() != transaction.hash()?.as_slice() {
            warn!(
                "Transaction {} does not match its content hash",
                transaction.get_id_hex()
            );
            return Ok(false);
        }
        if self.contains_transaction(transaction.get_id())? {
            warn!("Transaction {} is already on chain", transaction.get_id_hex());
            return Ok(false);
        }
        if transaction.is_coinbase() {
            let pays_reward = transaction.get_vout().len() == 1
                && transaction.get_vout()[0].get_value() == self.block_reward;
            if !pays_reward {
                warn!(
                    "Coinbase {} does not pay the block reward of {}",
                    transaction.get_id_hex(),
                    self.block_reward
                );
            }
            return Ok(pays_reward);
        }
        if transaction.get_vin().is_empty() || transaction.get_vout().is_empty() {
            return Ok(false);
        }

        let prev_txs = match self.find_referenced_transactions(transaction) {
            Ok(prev_txs) => prev_txs,
            Err(LedgerError::TransactionNotFound(txid)) => {
                warn!("Transaction {} spends unknown {txid}", transaction.get_id_hex());
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !transaction.verify(&prev_txs) {
            return Ok(false);
        }

        // verify() already resolved every referenced output
        let input_value = transaction.get_vin().iter().try_fold(0u64, |total, vin| {
            let output = vin
                .output_index()
                .and_then(|idx| prev_txs.get(vin.get_txid())?.get_vout().get(idx))?;
            total.checked_add(output.get_value())
        });
        if input_value.is_none() || input_value != transaction.get_output_value() {
            warn!(
                "Transaction {} does not conserve value: inputs {input_value:?}, outputs {:?}",
                transaction.get_id_hex(),
                transaction.get_output_value()
            );
            return Ok(false);
        }

        for vin in transaction.get_vin() {
            if self.is_output_spent(vin.get_txid(), vin.get_vout())? {
                warn!(
                    "Transaction {} double-spends {}:{}",
                    transaction.get_id_hex(),
                    HEXLOWER.encode(vin.get_txid()),
                    vin.get_vout()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether any committed transaction already consumes `txid:vout`.
    pub fn is_output_spent(&self, txid: &[u8], vout: i64) -> Result<bool> {
        for block in self.iterator()? {
            let spent = block?
                .get_transactions()
                .iter()
                .filter(|tx| !tx.is_coinbase())
                .flat_map(|tx| tx.get_vin())
                .any(|input| input.get_txid() == txid && input.get_vout() == vout);
            if spent {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every unspent output on the chain, grouped by transaction id.
    ///
    /// Walks tip to genesis, and each block's transactions last to first, so a
    /// spend is always recorded before the output it consumes is visited.
    pub fn find_utxo(&self) -> Result<BTreeMap<Vec<u8>, Vec<UnspentOutput>>> {
        let mut utxo: BTreeMap<Vec<u8>, Vec<UnspentOutput>> = BTreeMap::new();
        let mut spent_txos: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for block in self.iterator()? {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let unspent: Vec<UnspentOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent_txos.contains(&(tx.get_id().to_vec(), *idx)))
                    .map(|(idx, out): (usize, &TXOutput)| UnspentOutput::new(idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(tx.get_id().to_vec(), unspent);
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(idx) = txin.output_index() {
                        spent_txos.insert((txin.get_txid().to_vec(), idx));
                    }
                }
            }
        }
        Ok(utxo)
    }
}

/// Walks blocks from a starting hash back to genesis.
pub struct BlockchainIterator {
    blocks_tree: Tree,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks_tree: Tree) -> BlockchainIterator {
        BlockchainIterator {
            blocks_tree,
            current_hash: tip_hash,
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        // genesis points at an empty hash
        if self.current_hash.is_empty() {
            return None;
        }
        let current = std::mem::take(&mut self.current_hash);
        let block = match self.blocks_tree.get(&current) {
            Ok(Some(bytes)) => Block::deserialize(bytes.as_ref()),
            Ok(None) => Err(LedgerError::Database(format!(
                "block {} is missing",
                HEXLOWER.encode(&current)
            ))),
            Err(e) => Err(e.into()),
        };
        if let Ok(block) = &block {
            self.current_hash = block.get_pre_block_hash().to_vec();
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tempfile::{tempdir, TempDir};

    const DIFFICULTY: u32 = 4;

    fn create_test_blockchain() -> (Blockchain, Wallet, TempDir) {
        let dir = tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let blockchain = Blockchain::init_blockchain(
            &wallet.get_address(),
            &dir.path().join("blocks"),
            DIFFICULTY,
            100,
        )
        .unwrap();
        (blockchain, wallet, dir)
    }

    fn coinbase_to(wallet: &Wallet) -> Transaction {
        Transaction::new_coinbase_tx(&wallet.get_address(), "", 100).unwrap()
    }

    #[test]
    fn test_genesis_is_tip() {
        let (blockchain, _, _dir) = create_test_blockchain();
        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap().unwrap();

        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert!(genesis.is_genesis());
        assert!(ProofOfWork::new_proof_of_work(&genesis, DIFFICULTY)
            .unwrap()
            .validate());
    }

    #[test]
    fn test_init_twice_fails() {
        let (blockchain, wallet, dir) = create_test_blockchain();
        blockchain.close().unwrap();
        drop(blockchain);

        let result =
            Blockchain::init_blockchain(&wallet.get_address(), &dir.path().join("blocks"), 4, 100);
        assert!(matches!(result, Err(LedgerError::AlreadyExists)));
    }

    #[test]
    fn test_init_with_bad_address_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks");
        let result = Blockchain::init_blockchain("bogus", &path, DIFFICULTY, 100);

        assert!(matches!(result, Err(LedgerError::InvalidAddress(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_continue_missing_chain() {
        let dir = tempdir().unwrap();
        let result = Blockchain::continue_blockchain(&dir.path().join("none"), DIFFICULTY, 100);
        assert!(matches!(result, Err(LedgerError::NotFound)));
    }

    #[test]
    fn test_add_block_checks_height() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let block = Block::mine(blockchain.get_tip_hash(), vec![coinbase_to(&wallet)], 2, DIFFICULTY)
            .unwrap();

        assert!(matches!(
            blockchain.add_block(&block),
            Err(LedgerError::BlockHeightInvalid {
                expected: 1,
                actual: 2
            })
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_add_block_checks_prev_hash() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let block = Block::mine(vec![0xAB; 32], vec![coinbase_to(&wallet)], 1, DIFFICULTY).unwrap();

        assert!(matches!(
            blockchain.add_block(&block),
            Err(LedgerError::BlockPrevHashInvalid { .. })
        ));
    }

    #[test]
    fn test_add_block_is_idempotent() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let block = Block::mine(blockchain.get_tip_hash(), vec![coinbase_to(&wallet)], 1, DIFFICULTY)
            .unwrap();

        blockchain.add_block(&block).unwrap();
        blockchain.add_block(&block).unwrap();

        assert_eq!(blockchain.get_best_height().unwrap(), 1);
        assert_eq!(blockchain.get_tip_hash(), block.get_hash());
    }

    #[test]
    fn test_add_block_checks_proof_of_work() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        // solved for an easier target than the chain's
        let block = Block::mine(blockchain.get_tip_hash(), vec![coinbase_to(&wallet)], 1, 1).unwrap();

        assert!(matches!(
            blockchain.add_block(&block),
            Err(LedgerError::InvalidBlock(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_mine_block_needs_one_trailing_coinbase() {
        let (blockchain, wallet, _dir) = create_test_blockchain();

        assert!(matches!(
            blockchain.mine_block(vec![]),
            Err(LedgerError::InvalidBlock(_))
        ));
        assert!(matches!(
            blockchain.mine_block(vec![coinbase_to(&wallet), coinbase_to(&wallet)]),
            Err(LedgerError::InvalidBlock(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_coinbase_must_pay_the_block_reward() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let overpaid = Transaction::new_coinbase_tx(&wallet.get_address(), "", 1_000_000).unwrap();
        let underpaid = Transaction::new_coinbase_tx(&wallet.get_address(), "", 1).unwrap();

        assert!(!blockchain.verify_transaction(&overpaid).unwrap());
        assert!(!blockchain.verify_transaction(&underpaid).unwrap());
        assert!(blockchain.verify_transaction(&coinbase_to(&wallet)).unwrap());
        assert!(matches!(
            blockchain.mine_block(vec![overpaid]),
            Err(LedgerError::TransactionInvalid(_))
        ));
    }

    #[test]
    fn test_committed_transaction_cannot_be_mined_again() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let coinbase = coinbase_to(&wallet);
        blockchain.mine_block(vec![coinbase.clone()]).unwrap();

        assert!(blockchain.contains_transaction(coinbase.get_id()).unwrap());
        assert!(!blockchain.verify_transaction(&coinbase).unwrap());
        assert!(matches!(
            blockchain.mine_block(vec![coinbase]),
            Err(LedgerError::TransactionInvalid(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_mine_block_links_to_parent() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let parent = blockchain.get_tip_hash();
        let block = blockchain.mine_block(vec![coinbase_to(&wallet)]).unwrap();

        assert_eq!(block.get_height(), 1);
        assert_eq!(block.get_pre_block_hash(), parent.as_slice());
        assert_eq!(blockchain.iterator().unwrap().count(), 2);
    }

    #[test]
    fn test_find_transaction() {
        let (blockchain, wallet, _dir) = create_test_blockchain();
        let coinbase = coinbase_to(&wallet);
        blockchain.mine_block(vec![coinbase.clone()]).unwrap();

        assert_eq!(blockchain.find_transaction(coinbase.get_id()).unwrap(), coinbase);
        assert!(matches!(
            blockchain.find_transaction(&[1, 2, 3]),
            Err(LedgerError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent_across_clones() {
        let (blockchain, _, _dir) = create_test_blockchain();
        let other = blockchain.clone();

        blockchain.close().unwrap();
        other.close().unwrap();
        assert!(other.is_closed());
        assert!(other.get_best_height().is_err());
    }

    #[test]
    fn test_reopen_keeps_tip() {
        let (blockchain, wallet, dir) = create_test_blockchain();
        let block = blockchain.mine_block(vec![coinbase_to(&wallet)]).unwrap();
        blockchain.close().unwrap();
        drop(blockchain);

        let reopened =
            Blockchain::continue_blockchain(&dir.path().join("blocks"), DIFFICULTY, 100).unwrap();
        assert_eq!(reopened.get_tip_hash(), block.get_hash());
        assert_eq!(reopened.get_best_height().unwrap(), 1);
    }
}
