use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DIFFICULTY: u32 = 12;
pub const DEFAULT_BLOCK_REWARD: u64 = 100;
pub const DEFAULT_PACK_SIZE: usize = 10;
pub const DEFAULT_PACK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_HEARTBEAT_FAILURES: u32 = 30;
static DEFAULT_NODE_ADDR: &str = "127.0.0.1:3000";
static DEFAULT_DATA_DIR: &str = "./tmp";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
const MINING_ADDRESS_KEY: &str = "WALLET_ADDR";
const NODE_ADDRESS_KEY: &str = "NODE_ADDR";
const FULL_NODE_ADDRESS_KEY: &str = "FULL_NODE_ADDR";

const BLOCKS_DIR: &str = "blocks";
const WALLETS_DIR: &str = "wallets";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub difficulty: u32,
    pub block_reward: u64,
    pub pack_size: usize,
    pub pack_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub max_heartbeat_failures: u32,
    pub node_addr: String,
    pub full_node_addr: Option<String>,
    pub peers: Vec<String>,
    pub mining_address: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            difficulty: DEFAULT_DIFFICULTY,
            block_reward: DEFAULT_BLOCK_REWARD,
            pack_size: DEFAULT_PACK_SIZE,
            pack_timeout_secs: DEFAULT_PACK_TIMEOUT_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            max_heartbeat_failures: DEFAULT_MAX_HEARTBEAT_FAILURES,
            node_addr: String::from(DEFAULT_NODE_ADDR),
            full_node_addr: None,
            peers: vec![],
            mining_address: None,
        }
    }
}

impl Settings {
    /// Defaults, overlaid with an optional TOML file, overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env()?;
        settings.normalize();
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings> {
        let raw = fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Settings> {
        let mut settings: Settings = toml::from_str(raw)?;
        settings.normalize();
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = env::var(DIFFICULTY_KEY) {
            self.difficulty = raw
                .parse()
                .map_err(|e| LedgerError::Config(format!("Invalid {DIFFICULTY_KEY}: {e}")))?;
        }
        if let Ok(addr) = env::var(MINING_ADDRESS_KEY) {
            self.mining_address = Some(addr);
        }
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.node_addr = addr;
        }
        if let Ok(addr) = env::var(FULL_NODE_ADDRESS_KEY) {
            self.full_node_addr = Some(addr);
        }
        Ok(())
    }

    // zero pack size / timeout would spin the miner, fall back to the defaults
    fn normalize(&mut self) {
        if self.pack_size == 0 {
            self.pack_size = DEFAULT_PACK_SIZE;
        }
        if self.pack_timeout_secs == 0 {
            self.pack_timeout_secs = DEFAULT_PACK_TIMEOUT_SECS;
        }
        if self.heartbeat_interval_secs == 0 {
            self.heartbeat_interval_secs = DEFAULT_HEARTBEAT_INTERVAL_SECS;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty == 0 || self.difficulty > 255 {
            return Err(LedgerError::Config(format!(
                "difficulty must be within 1..=255, got {}",
                self.difficulty
            )));
        }
        Ok(())
    }

    /// The one-time directory setup every command runs before touching storage.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.wallets_dir())?;
        Ok(())
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join(BLOCKS_DIR)
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.data_dir.join(WALLETS_DIR)
    }

    pub fn pack_timeout(&self) -> Duration {
        Duration::from_secs(self.pack_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn is_miner(&self) -> bool {
        self.mining_address.is_some()
    }
}
