// Value transfer in the UTXO model: each transaction consumes earlier outputs
// and creates new ones locked to a public-key hash.

use crate::error::{LedgerError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Output index carried by the single input of a coinbase transaction.
pub const COINBASE_VOUT: i64 = -1;

/// Referenced transactions keyed by id, as resolved from the ledger.
pub type PrevTransactions = HashMap<Vec<u8>, Transaction>;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // transaction holding the output being spent
    vout: i64,          // index of that output, -1 for coinbase
    signature: Vec<u8>, // coinbase inputs carry their memo here
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, `None` for the coinbase marker or any negative value.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>, // locking hash
}

impl TXOutput {
    /// Output of `value` locked to the key behind `address`.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        Ok(TXOutput {
            value,
            pub_key_hash: address_to_pub_key_hash(address)?,
        })
    }

    pub fn locked_to(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Reward transaction paying `reward` to `to`. An empty memo is replaced
    /// with a unique one so two coinbases to the same address never share an id.
    pub fn new_coinbase_tx(to: &str, memo: &str, reward: u64) -> Result<Transaction> {
        let memo = if memo.is_empty() {
            format!("Coins to {to} ({})", Uuid::new_v4())
        } else {
            memo.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: memo.into_bytes(),
            pub_key: vec![],
        };
        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::new(reward, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds and signs a transfer of `amount` from `wallet` to `to`, spending
    /// outputs picked from the UTXO index and returning change to the sender.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::TransactionCreateFailed(
                "amount must be positive".to_string(),
            ));
        }
        let to_output = TXOutput::new(amount, to)?;

        let pub_key_hash = wallet.get_pub_key_hash();
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(pub_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let inputs = valid_outputs
            .iter()
            .map(|(txid, out)| TXInput::new(txid, *out, wallet.get_public_key()))
            .collect();

        let mut outputs = vec![to_output];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::locked_to(change, pub_key_hash.as_slice()));
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    // inputs stripped of signature and public key, outputs untouched
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    // The per-input digest: id of the trimmed copy with this input's public-key
    // slot holding the referenced output's locking hash.
    fn signing_digest(tx_copy: &mut Transaction, idx: usize, locking_hash: &[u8]) -> Result<Vec<u8>> {
        tx_copy.vin[idx].pub_key = locking_hash.to_vec();
        let digest = tx_copy.hash();
        tx_copy.vin[idx].pub_key = vec![];
        digest
    }

    fn referenced_output<'a>(
        input: &TXInput,
        prev_txs: &'a PrevTransactions,
    ) -> std::result::Result<&'a TXOutput, String> {
        let txid_hex = HEXLOWER.encode(input.get_txid());
        let prev_tx = prev_txs
            .get(input.get_txid())
            .ok_or_else(|| format!("referenced transaction {txid_hex} not found"))?;
        input
            .output_index()
            .and_then(|idx| prev_tx.vout.get(idx))
            .ok_or_else(|| format!("output {} of {txid_hex} does not exist", input.vout))
    }

    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let locking_hash = Self::referenced_output(&self.vin[idx], prev_txs)
                .map_err(LedgerError::TransactionSignFailed)?
                .get_pub_key_hash()
                .to_vec();

            let digest = Self::signing_digest(&mut tx_copy, idx, &locking_hash)?;
            let signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)
                .map_err(|e| LedgerError::TransactionSignFailed(e.to_string()))?;
            self.vin[idx].signature = signature;
        }
        Ok(())
    }

    /// All-or-nothing: a single failing input invalidates the transaction.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> bool {
        match self.hash() {
            Ok(hash) if hash == self.id => {}
            Ok(_) => {
                log::warn!(
                    "Verification failed: id {} does not match the content",
                    HEXLOWER.encode(&self.id)
                );
                return false;
            }
            Err(e) => {
                log::error!("Failed to hash transaction: {e}");
                return false;
            }
        }
        if self.is_coinbase() {
            return true;
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_output = match Self::referenced_output(vin, prev_txs) {
                Ok(output) => output,
                Err(reason) => {
                    log::warn!("Verification failed: {reason}");
                    return false;
                }
            };

            // the embedded key must be the one the output was locked to
            if !vin.uses_key(prev_output.get_pub_key_hash()) {
                log::warn!(
                    "Verification failed: input {idx} of {} is not signed by the output owner",
                    HEXLOWER.encode(&self.id)
                );
                return false;
            }

            let digest =
                match Self::signing_digest(&mut tx_copy, idx, prev_output.get_pub_key_hash()) {
                    Ok(digest) => digest,
                    Err(e) => {
                        log::error!("Failed to rebuild signing digest: {e}");
                        return false;
                    }
                };

            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                digest.as_slice(),
            ) {
                return false;
            }
        }
        true
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 over the encoding of inputs and outputs, with the id left out.
    /// Spend signatures are blanked, so signing never changes the id; a coinbase
    /// keeps its memo.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let is_coinbase = self.is_coinbase();
        let vin = self
            .vin
            .iter()
            .map(|input| TXInput {
                signature: if is_coinbase {
                    input.signature.clone()
                } else {
                    vec![]
                },
                ..input.clone()
            })
            .collect();
        let tx_copy = Transaction {
            id: vec![],
            vin,
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(self.id.as_slice())
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_output_value(&self) -> Option<u64> {
        self.vout
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.get_value()))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}
