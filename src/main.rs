use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use std::io::{self, BufRead};
use std::net::TcpListener;
use std::process;
use std::thread;
use utxo_ledger::{
    address_to_pub_key_hash, convert_address, hash_pub_key, send_tx, validate_address,
    Blockchain, Command, LedgerError, Miner, Opt, ProofOfWork, Result, Server, Settings,
    ShutdownToken, TcpBroadcaster, Transaction, UTXOSet, Wallets,
};

const STOP_COMMAND: &str = "stop";

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    let settings = Settings::load(opt.config.as_deref())?;
    settings.validate()?;
    settings.ensure_dirs()?;
    run_command(&settings, opt.command)
}

// Opens the chain, runs `f`, and closes the store whatever `f` returned.
fn with_blockchain<T>(settings: &Settings, f: impl FnOnce(&Blockchain) -> Result<T>) -> Result<T> {
    let blockchain = Blockchain::continue_from_settings(settings)?;
    let result = f(&blockchain);
    let closed = blockchain.close();
    let value = result?;
    closed?;
    Ok(value)
}

fn run_command(settings: &Settings, command: Command) -> Result<()> {
    match command {
        Command::Createblockchain { address } => {
            let blockchain = Blockchain::init_from_settings(&address, settings)?;
            let result = UTXOSet::new(blockchain.clone()).reindex();
            blockchain.close()?;
            result?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::open(&settings.wallets_dir())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let balance = with_blockchain(settings, |blockchain| {
                UTXOSet::new(blockchain.clone()).get_balance(&pub_key_hash)
            })?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::open(&settings.wallets_dir())?;
            for address in wallets.get_addresses() {
                println!("{address}");
            }
        }
        Command::Send {
            from,
            to,
            amount,
            node,
        } => {
            if !validate_address(&to) {
                return Err(LedgerError::InvalidAddress(to));
            }
            let wallets = Wallets::open(&settings.wallets_dir())?;
            let wallet = wallets.require_wallet(&from)?;

            with_blockchain(settings, |blockchain| {
                let utxo_set = UTXOSet::new(blockchain.clone());
                let tx = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

                match &node {
                    Some(node_addr) => {
                        send_tx(node_addr, &settings.node_addr, &tx)?;
                        info!("Transaction {} sent to {node_addr}", tx.get_id_hex());
                    }
                    None => {
                        let coinbase =
                            Transaction::new_coinbase_tx(&from, "", blockchain.get_block_reward())?;
                        let block = blockchain.mine_block(vec![tx, coinbase])?;
                        utxo_set.update(&block)?;
                    }
                }
                Ok(())
            })?;
            println!("Success!");
        }
        Command::Printchain => with_blockchain(settings, print_chain)?,
        Command::Reindexutxo => {
            let count = with_blockchain(settings, |blockchain| {
                let utxo_set = UTXOSet::new(blockchain.clone());
                utxo_set.reindex()?;
                utxo_set.count_transactions()
            })?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartMiner { address } => {
            let address = address
                .or_else(|| settings.mining_address.clone())
                .ok_or_else(|| {
                    LedgerError::Config("no mining address given and WALLET_ADDR unset".to_string())
                })?;
            start_miner(settings, &address)?;
        }
    }
    Ok(())
}

fn print_chain(blockchain: &Blockchain) -> Result<()> {
    for block in blockchain.iterator()? {
        let block = block?;
        let pow = ProofOfWork::new_proof_of_work(&block, blockchain.get_difficulty())?;

        println!("============ Block {} ============", block.get_hash_hex());
        println!("Height: {}", block.get_height());
        println!("Prev. block: {}", HEXLOWER.encode(block.get_pre_block_hash()));
        println!("Timestamp: {}", block.get_timestamp());
        println!("Nonce: {}", block.get_nonce());
        println!("PoW: {}", pow.validate());

        for tx in block.get_transactions() {
            println!("- Transaction {}", tx.get_id_hex());
            if !tx.is_coinbase() {
                for input in tx.get_vin() {
                    let address = convert_address(hash_pub_key(input.get_pub_key()).as_slice());
                    println!(
                        "-- Input txid = {}, vout = {}, from = {address}",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout(),
                    );
                }
            }
            for output in tx.get_vout() {
                println!(
                    "-- Output value = {}, to = {}",
                    output.get_value(),
                    convert_address(output.get_pub_key_hash())
                );
            }
        }
        println!();
    }
    Ok(())
}

fn start_miner(settings: &Settings, address: &str) -> Result<()> {
    let blockchain = Blockchain::continue_from_settings(settings)?;
    let peers = settings
        .peers
        .iter()
        .cloned()
        .chain(settings.full_node_addr.clone());
    let broadcaster = TcpBroadcaster::new(&settings.node_addr, peers);

    let miner = match Miner::new(address, blockchain.clone(), settings, Box::new(broadcaster)) {
        Ok(miner) => miner,
        Err(e) => {
            blockchain.close()?;
            return Err(e);
        }
    };
    let listener = match TcpListener::bind(&settings.node_addr) {
        Ok(listener) => listener,
        Err(e) => {
            blockchain.close()?;
            return Err(LedgerError::Network(format!(
                "Failed to bind to {}: {e}",
                settings.node_addr
            )));
        }
    };

    spawn_stop_listener(miner.shutdown_token());
    println!("Mining is on. Address to receive rewards: {address}");

    thread::scope(|scope| {
        let server = scope.spawn(|| {
            let served = Server::new(&miner).run(listener);
            if served.is_err() {
                miner.stop();
            }
            served
        });
        let mined = miner.run();
        // the server exits on its own once the miner's token is cancelled
        miner.stop();
        let served = server
            .join()
            .unwrap_or_else(|_| Err(LedgerError::Worker("server thread panicked".to_string())));
        mined.and(served)
    })
}

// Detached: a blocked stdin read must not keep the process alive.
fn spawn_stop_listener(token: ShutdownToken) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == STOP_COMMAND => {
                    info!("Stop requested");
                    token.cancel();
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    return;
                }
            }
        }
    });
}
