//! Configuration management
//!
//! Node settings are resolved once at startup (defaults, then an optional
//! TOML file, then environment variables) and handed to every component.

pub mod settings;

pub use settings::{
    Settings, DEFAULT_BLOCK_REWARD, DEFAULT_DIFFICULTY, DEFAULT_PACK_SIZE, DEFAULT_PACK_TIMEOUT_SECS,
};
