use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "utxo-ledger")]
pub struct Opt {
    #[arg(long, global = true, help = "TOML settings file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "send", about = "Send coins between addresses")]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(
            long = "node",
            help = "Hand the transaction to this mining node instead of mining it here"
        )]
        node: Option<String>,
    },
    #[command(name = "printchain", about = "Print all blocks in the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(
        name = "startminer",
        about = "Start a mining node; type 'stop' on stdin to shut it down"
    )]
    StartMiner {
        #[arg(help = "Address receiving block rewards (defaults to WALLET_ADDR)")]
        address: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_with_node() {
        let opt = Opt::try_parse_from([
            "utxo-ledger",
            "send",
            "from",
            "to",
            "30",
            "--node",
            "127.0.0.1:3000",
        ])
        .unwrap();
        match opt.command {
            Command::Send {
                amount, node, ..
            } => {
                assert_eq!(amount, 30);
                assert_eq!(node.as_deref(), Some("127.0.0.1:3000"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_config() {
        let opt = Opt::try_parse_from(["utxo-ledger", "printchain", "--config", "node.toml"])
            .unwrap();
        assert_eq!(opt.config, Some(PathBuf::from("node.toml")));
        assert!(matches!(opt.command, Command::Printchain));
    }

    #[test]
    fn test_rejects_negative_amount() {
        assert!(Opt::try_parse_from(["utxo-ledger", "send", "a", "b", "-5"]).is_err());
    }
}
