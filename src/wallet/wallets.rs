use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::info;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallets.dat";

/// Wallets stored in one bincode file under an explicit directory.
pub struct Wallets {
    wallets: BTreeMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    pub fn open(dir: &Path) -> Result<Wallets> {
        let path = dir.join(WALLET_FILE);
        let wallets = if path.exists() {
            let buf = fs::read(&path)?;
            deserialize(&buf[..])?
        } else {
            BTreeMap::new()
        };
        Ok(Wallets { wallets, path })
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    /// Addresses in sorted order.
    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn require_wallet(&self, address: &str) -> Result<&Wallet> {
        self.get_wallet(address).ok_or_else(|| {
            LedgerError::InvalidAddress(format!("no local wallet for address {address}"))
        })
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}
