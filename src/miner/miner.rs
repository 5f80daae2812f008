// The mining node: packs pending transactions into blocks on a worker thread,
// keeps the UTXO index in step with every block it commits, and reports its
// liveness to the rest of the network.

use crate::config::Settings;
use crate::core::{Block, Blockchain, Transaction};
use crate::error::{LedgerError, Result};
use crate::miner::ShutdownToken;
use crate::network::Broadcaster;
use crate::storage::{MemoryPool, UTXOSet};
use crate::wallet::validate_address;
use log::{error, info, warn};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

pub const BLOCK_COMMAND: &str = "block";
pub const HEARTBEAT_COMMAND: &str = "heartbeat";

pub struct Miner {
    mining_address: String,
    node_addr: String,
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    memory_pool: MemoryPool,
    broadcaster: Box<dyn Broadcaster>,
    shutdown: ShutdownToken,
    heartbeat_interval: Duration,
    max_heartbeat_failures: u32,
}

impl Miner {
    pub fn new(
        mining_address: &str,
        blockchain: Blockchain,
        settings: &Settings,
        broadcaster: Box<dyn Broadcaster>,
    ) -> Result<Miner> {
        if !validate_address(mining_address) {
            return Err(LedgerError::InvalidAddress(mining_address.to_string()));
        }
        Ok(Miner {
            mining_address: mining_address.to_string(),
            node_addr: settings.node_addr.clone(),
            utxo_set: UTXOSet::new(blockchain.clone()),
            blockchain,
            memory_pool: MemoryPool::from_settings(settings),
            broadcaster,
            shutdown: ShutdownToken::new(),
            heartbeat_interval: settings.heartbeat_interval(),
            max_heartbeat_failures: settings.max_heartbeat_failures,
        })
    }

    pub fn with_heartbeat(mut self, interval: Duration, max_failures: u32) -> Miner {
        self.heartbeat_interval = interval;
        self.max_heartbeat_failures = max_failures;
        self
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_utxo_set(&self) -> &UTXOSet {
        &self.utxo_set
    }

    pub fn get_memory_pool(&self) -> &MemoryPool {
        &self.memory_pool
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Requests shutdown: cancels the token and releases any waiting pack.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.memory_pool.close();
    }

    /// Runs the mining worker and the heartbeat until the shutdown token is
    /// cancelled, then closes the ledger store. Returns the worker's error if
    /// it stopped on one.
    pub fn run(&self) -> Result<()> {
        info!(
            "Miner started at {}, rewards go to {}",
            self.node_addr, self.mining_address
        );

        let outcome = thread::scope(|scope| {
            let worker = scope.spawn(|| {
                let result = self.mine_loop();
                if let Err(e) = &result {
                    error!("Mining stopped: {e}");
                    self.stop();
                }
                result
            });
            let heartbeat = scope.spawn(|| self.heartbeat_loop());

            self.shutdown.wait();
            self.memory_pool.close();

            let mined = worker
                .join()
                .unwrap_or_else(|_| Err(LedgerError::Worker("mining worker panicked".to_string())));
            if heartbeat.join().is_err() {
                warn!("Heartbeat worker panicked");
            }
            mined
        });

        self.blockchain.close()?;
        info!("Miner stopped");
        outcome
    }

    fn mine_loop(&self) -> Result<()> {
        while !self.shutdown.is_cancelled() {
            let pack = self.memory_pool.get_pack();
            if pack.is_empty() {
                if self.memory_pool.is_closed() {
                    break;
                }
                continue;
            }
            if self.shutdown.is_cancelled() {
                self.memory_pool.requeue(pack);
                break;
            }
            self.mine_pack(pack)?;
        }
        Ok(())
    }

    /// Mines one block out of `pack`. Invalid transactions are dropped, the
    /// rest are mined together with a coinbase to the mining address.
    ///
    /// Returns `Ok(None)` when nothing could be mined. On a rejected block the
    /// valid transactions go back to the pool; fatal errors are returned.
    pub fn mine_pack(&self, pack: Vec<Transaction>) -> Result<Option<Block>> {
        let mut accepted: Vec<Transaction> = Vec::with_capacity(pack.len() + 1);
        let mut claimed = HashSet::new();
        let mut pending = pack.into_iter();

        while let Some(tx) = pending.next() {
            // the only coinbase in a block is the one minted below
            if tx.is_coinbase() {
                warn!("Dropping foreign coinbase {}", tx.get_id_hex());
                continue;
            }
            match self.blockchain.verify_transaction(&tx) {
                Ok(true) => {
                    let inputs: Vec<(Vec<u8>, i64)> = tx
                        .get_vin()
                        .iter()
                        .map(|vin| (vin.get_txid().to_vec(), vin.get_vout()))
                        .collect();
                    if inputs.iter().any(|input| claimed.contains(input)) {
                        warn!("Dropping transaction {}: conflicts with the pack", tx.get_id_hex());
                        continue;
                    }
                    claimed.extend(inputs);
                    accepted.push(tx);
                }
                Ok(false) => warn!("Dropping invalid transaction {}", tx.get_id_hex()),
                Err(e) => {
                    accepted.push(tx);
                    accepted.extend(pending);
                    self.memory_pool.requeue(accepted);
                    return Err(e);
                }
            }
        }

        if accepted.is_empty() {
            return Ok(None);
        }

        let coinbase = Transaction::new_coinbase_tx(
            &self.mining_address,
            "",
            self.blockchain.get_block_reward(),
        )?;
        let mut block_txs = accepted.clone();
        block_txs.push(coinbase);

        let block = match self.blockchain.mine_block(block_txs) {
            Ok(block) => block,
            Err(e) => {
                let count = accepted.len();
                self.memory_pool.requeue(accepted);
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("Block rejected ({e}), {count} transactions returned to the pool");
                return Ok(None);
            }
        };

        self.utxo_set.update(&block)?;
        info!(
            "Mined block {} at height {} with {} transactions",
            block.get_hash_hex(),
            block.get_height(),
            block.get_transactions().len()
        );

        if let Err(e) = self.broadcaster.broadcast(BLOCK_COMMAND, &block.serialize()?) {
            warn!("Failed to broadcast block {}: {e}", block.get_hash_hex());
        }
        Ok(Some(block))
    }

    /// Ingress for a transaction received from the network.
    pub fn handle_tx(&self, raw: &[u8]) -> Result<()> {
        let tx = Transaction::deserialize(raw)?;
        if tx.is_coinbase() {
            warn!("Refusing coinbase {} from the network", tx.get_id_hex());
            return Err(LedgerError::TransactionInvalid(tx.get_id_hex()));
        }
        if !self.blockchain.verify_transaction(&tx)? {
            return Err(LedgerError::TransactionInvalid(tx.get_id_hex()));
        }
        if self.memory_pool.contains(tx.get_id()) {
            info!("Transaction {} already pending", tx.get_id_hex());
            return Ok(());
        }
        info!("Transaction {} accepted into the pool", tx.get_id_hex());
        self.memory_pool.add(tx);
        Ok(())
    }

    fn heartbeat_loop(&self) {
        let mut failures: u32 = 0;
        while !self.shutdown.wait_timeout(self.heartbeat_interval) {
            match self
                .broadcaster
                .broadcast(HEARTBEAT_COMMAND, self.node_addr.as_bytes())
            {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!("Heartbeat failed ({failures} in a row): {e}");
                    if failures > self.max_heartbeat_failures {
                        error!("Giving up after {failures} failed heartbeats");
                        self.stop();
                        return;
                    }
                }
            }
        }
    }
}
