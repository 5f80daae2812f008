use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use utxo_ledger::{
    Block, Blockchain, LedgerError, MemoryPool, ProofOfWork, Settings, Transaction, UTXOSet,
    Wallet,
};

const DIFFICULTY: u32 = 6;

struct TestLedger {
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    genesis_wallet: Wallet,
    dir: TempDir,
}

fn create_ledger() -> TestLedger {
    let dir = tempdir().unwrap();
    let genesis_wallet = Wallet::new().unwrap();
    let blockchain = Blockchain::init_blockchain(
        &genesis_wallet.get_address(),
        &dir.path().join("blocks"),
        DIFFICULTY,
        100,
    )
    .unwrap();
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    TestLedger {
        blockchain,
        utxo_set,
        genesis_wallet,
        dir,
    }
}

fn balance(utxo_set: &UTXOSet, wallet: &Wallet) -> u64 {
    utxo_set.get_balance(&wallet.get_pub_key_hash()).unwrap()
}

fn reward() -> Transaction {
    let miner = Wallet::new().unwrap();
    Transaction::new_coinbase_tx(&miner.get_address(), "", 100).unwrap()
}

// Same content, different id.
fn relabel(tx: &Transaction, id: &[u8]) -> Transaction {
    let mut value = serde_json::to_value(tx).unwrap();
    value["id"] = serde_json::json!(id);
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_transfer_and_balances() {
    let ledger = create_ledger();
    let a = &ledger.genesis_wallet;
    let b = Wallet::new().unwrap();
    let miner = Wallet::new().unwrap();

    let tx = Transaction::new_utxo_transaction(a, &b.get_address(), 30, &ledger.utxo_set).unwrap();
    let coinbase = Transaction::new_coinbase_tx(&miner.get_address(), "", 100).unwrap();
    let block = ledger.blockchain.mine_block(vec![tx, coinbase]).unwrap();
    ledger.utxo_set.update(&block).unwrap();

    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 1);
    assert_eq!(balance(&ledger.utxo_set, a), 70);
    assert_eq!(balance(&ledger.utxo_set, &b), 30);
    assert_eq!(ledger.utxo_set.find_utxo(&a.get_pub_key_hash()).unwrap().len(), 1);
    assert!(ProofOfWork::new_proof_of_work(&block, DIFFICULTY)
        .unwrap()
        .validate());
}

#[test]
fn test_insufficient_funds() {
    let ledger = create_ledger();
    let b = Wallet::new().unwrap();

    let result = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &b.get_address(),
        101,
        &ledger.utxo_set,
    );
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds {
            required: 101,
            available: 100
        })
    ));
}

#[test]
fn test_double_spend_is_rejected() {
    let ledger = create_ledger();
    let b = Wallet::new().unwrap();
    let c = Wallet::new().unwrap();

    let first = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &b.get_address(),
        40,
        &ledger.utxo_set,
    )
    .unwrap();
    let second = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &c.get_address(),
        50,
        &ledger.utxo_set,
    )
    .unwrap();

    // both in one batch
    assert!(matches!(
        ledger
            .blockchain
            .mine_block(vec![first.clone(), second.clone(), reward()]),
        Err(LedgerError::TransactionInvalid(_))
    ));
    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 0);

    // across blocks
    let block = ledger.blockchain.mine_block(vec![first.clone(), reward()]).unwrap();
    ledger.utxo_set.update(&block).unwrap();
    assert!(!ledger.blockchain.verify_transaction(&second).unwrap());
    assert!(matches!(
        ledger.blockchain.mine_block(vec![second, reward()]),
        Err(LedgerError::TransactionInvalid(_))
    ));

    // the same transaction committed twice
    assert!(!ledger.blockchain.verify_transaction(&first).unwrap());
    assert!(matches!(
        ledger.blockchain.mine_block(vec![first, reward()]),
        Err(LedgerError::TransactionInvalid(_))
    ));
    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 1);
}

#[test]
fn test_coinbase_rules() {
    let ledger = create_ledger();
    let thief = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();
    let tx = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &b.get_address(),
        10,
        &ledger.utxo_set,
    )
    .unwrap();
    let minted = Transaction::new_coinbase_tx(&thief.get_address(), "", 1_000_000).unwrap();

    // no coinbase, two coinbases, coinbase not last
    for txs in [
        vec![tx.clone()],
        vec![tx.clone(), reward(), reward()],
        vec![reward(), tx.clone()],
    ] {
        assert!(matches!(
            ledger.blockchain.mine_block(txs),
            Err(LedgerError::InvalidBlock(_))
        ));
    }

    // overvalued coinbase, alone or next to a fair one
    assert!(!ledger.blockchain.verify_transaction(&minted).unwrap());
    assert!(matches!(
        ledger.blockchain.mine_block(vec![tx.clone(), minted.clone()]),
        Err(LedgerError::TransactionInvalid(_))
    ));
    assert!(matches!(
        ledger.blockchain.mine_block(vec![minted, tx.clone(), reward()]),
        Err(LedgerError::InvalidBlock(_))
    ));
    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 0);

    let block = ledger.blockchain.mine_block(vec![tx, reward()]).unwrap();
    ledger.utxo_set.update(&block).unwrap();
    assert_eq!(balance(&ledger.utxo_set, &thief), 0);
    assert_eq!(balance(&ledger.utxo_set, &b), 10);
}

#[test]
fn test_forged_id_is_rejected() {
    let ledger = create_ledger();
    let victim = Wallet::new().unwrap();
    let funding = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &victim.get_address(),
        40,
        &ledger.utxo_set,
    )
    .unwrap();
    let block = ledger.blockchain.mine_block(vec![funding.clone(), reward()]).unwrap();
    ledger.utxo_set.update(&block).unwrap();
    assert_eq!(balance(&ledger.utxo_set, &victim), 40);

    // a genuine spend of the attacker's own change, relabelled with the victim's funding id
    let spend = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &Wallet::new().unwrap().get_address(),
        10,
        &ledger.utxo_set,
    )
    .unwrap();
    assert!(ledger.blockchain.verify_transaction(&spend).unwrap());
    let forged = relabel(&spend, funding.get_id());
    assert_ne!(forged.get_id(), forged.hash().unwrap().as_slice());

    assert!(!ledger.blockchain.verify_transaction(&forged).unwrap());
    assert!(matches!(
        ledger.blockchain.mine_block(vec![forged, reward()]),
        Err(LedgerError::TransactionInvalid(_))
    ));

    // an id that matches nothing on chain is refused as well
    let unknown = relabel(&spend, &[0x42; 32]);
    assert!(!ledger.blockchain.verify_transaction(&unknown).unwrap());

    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 1);
    assert_eq!(balance(&ledger.utxo_set, &victim), 40);
    assert_eq!(
        ledger.blockchain.find_transaction(funding.get_id()).unwrap(),
        funding
    );
}

#[test]
fn test_unsolved_block_is_refused() {
    let ledger = create_ledger();
    let genesis_hash = ledger.blockchain.get_tip_hash();
    let easy = Block::mine(genesis_hash, vec![reward()], 1, 1).unwrap();

    assert!(matches!(
        ledger.blockchain.add_block(&easy),
        Err(LedgerError::InvalidBlock(_))
    ));
    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 0);
}

#[test]
fn test_block_admission_rules() {
    let ledger = create_ledger();
    let wallet = Wallet::new().unwrap();
    let coinbase = || Transaction::new_coinbase_tx(&wallet.get_address(), "", 100).unwrap();
    let genesis_hash = ledger.blockchain.get_tip_hash();

    let first = Block::mine(genesis_hash.clone(), vec![coinbase()], 1, DIFFICULTY).unwrap();
    ledger.blockchain.add_block(&first).unwrap();

    // same height as the tip
    let sibling = Block::mine(genesis_hash, vec![coinbase()], 1, DIFFICULTY).unwrap();
    assert!(matches!(
        ledger.blockchain.add_block(&sibling),
        Err(LedgerError::BlockHeightInvalid { .. })
    ));

    // right height, wrong parent
    let stray = Block::mine(vec![7; 32], vec![coinbase()], 2, DIFFICULTY).unwrap();
    assert!(matches!(
        ledger.blockchain.add_block(&stray),
        Err(LedgerError::BlockPrevHashInvalid { .. })
    ));

    ledger.blockchain.add_block(&first).unwrap();
    assert_eq!(ledger.blockchain.get_tip_hash(), first.get_hash());
    assert_eq!(ledger.blockchain.get_best_height().unwrap(), 1);
}

#[test]
fn test_update_matches_reindex() {
    let ledger = create_ledger();
    let wallets: Vec<Wallet> = (0..3).map(|_| Wallet::new().unwrap()).collect();
    let mut sender = &ledger.genesis_wallet;

    for (round, receiver) in wallets.iter().enumerate() {
        let tx = Transaction::new_utxo_transaction(
            sender,
            &receiver.get_address(),
            20 + round as u64,
            &ledger.utxo_set,
        )
        .unwrap();
        let coinbase = Transaction::new_coinbase_tx(&receiver.get_address(), "", 100).unwrap();
        let block = ledger.blockchain.mine_block(vec![tx, coinbase]).unwrap();
        ledger.utxo_set.update(&block).unwrap();
        sender = receiver;
    }

    let updated = ledger.utxo_set.entries().unwrap();
    let count = ledger.utxo_set.count_transactions().unwrap();
    ledger.utxo_set.reindex().unwrap();

    assert_eq!(updated, ledger.utxo_set.entries().unwrap());
    assert_eq!(count, ledger.utxo_set.count_transactions().unwrap());

    ledger.utxo_set.reindex().unwrap();
    assert_eq!(updated, ledger.utxo_set.entries().unwrap());
}

#[test]
fn test_chain_survives_reopen() {
    let ledger = create_ledger();
    let b = Wallet::new().unwrap();
    let tx = Transaction::new_utxo_transaction(
        &ledger.genesis_wallet,
        &b.get_address(),
        10,
        &ledger.utxo_set,
    )
    .unwrap();
    let block = ledger.blockchain.mine_block(vec![tx, reward()]).unwrap();
    ledger.utxo_set.update(&block).unwrap();
    ledger.blockchain.close().unwrap();
    let TestLedger {
        blockchain,
        utxo_set,
        dir,
        ..
    } = ledger;
    drop(utxo_set);
    drop(blockchain);

    let path = dir.path().join("blocks");
    let reopened = Blockchain::continue_blockchain(&path, DIFFICULTY, 100).unwrap();
    assert_eq!(reopened.get_tip_hash(), block.get_hash());
    assert_eq!(
        UTXOSet::new(reopened.clone())
            .get_balance(&b.get_pub_key_hash())
            .unwrap(),
        10
    );
    let heights: Vec<u64> = reopened
        .iterator()
        .unwrap()
        .map(|block| block.unwrap().get_height())
        .collect();
    assert_eq!(heights, vec![1, 0]);
    reopened.close().unwrap();
    drop(reopened);

    assert!(matches!(
        Blockchain::init_blockchain(&b.get_address(), &path, DIFFICULTY, 100),
        Err(LedgerError::AlreadyExists)
    ));
}

#[test]
fn test_settings_locate_the_chain() {
    let dir = tempdir().unwrap();
    let settings = Settings {
        data_dir: dir.path().to_path_buf(),
        difficulty: DIFFICULTY,
        ..Settings::default()
    };
    settings.ensure_dirs().unwrap();

    assert!(matches!(
        Blockchain::continue_from_settings(&settings),
        Err(LedgerError::NotFound)
    ));

    let wallet = Wallet::new().unwrap();
    let blockchain = Blockchain::init_from_settings(&wallet.get_address(), &settings).unwrap();
    assert!(settings.blocks_dir().exists());
    assert_eq!(blockchain.get_block_reward(), settings.block_reward);
    blockchain.close().unwrap();
}

#[test]
fn test_mempool_packs_are_disjoint() {
    let pool = Arc::new(MemoryPool::new(3, Duration::from_millis(300)));
    let wallet = Wallet::new().unwrap();
    let txs: Vec<Transaction> = (0..7)
        .map(|_| Transaction::new_coinbase_tx(&wallet.get_address(), "", 1).unwrap())
        .collect();

    let producer = {
        let pool = Arc::clone(&pool);
        let txs = txs.clone();
        thread::spawn(move || {
            for tx in txs {
                pool.add(tx);
            }
        })
    };
    producer.join().unwrap();

    let started = Instant::now();
    let first = pool.get_pack();
    let second = pool.get_pack();
    assert!(started.elapsed() < Duration::from_millis(300));
    let third = pool.get_pack();

    assert_eq!(first, txs[0..3]);
    assert_eq!(second, txs[3..6]);
    assert_eq!(third, txs[6..]);
    assert!(pool.is_empty());
}
