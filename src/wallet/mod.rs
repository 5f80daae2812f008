//! Wallet management and address encoding
//!
//! Key pairs, the base58check address codec and a file-backed collection of
//! wallets keyed by address.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
