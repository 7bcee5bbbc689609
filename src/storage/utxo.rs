//! UTXO set implementation
//!
//! In-memory map of unspent transaction outputs. Every block node owns its
//! own copy; speculative work happens on a clone, never on a shared set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey};
use crate::validation::{Amount, Transaction, TxOutput};

/// Key for UTXO lookup: (tx_hash, output_index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UTXOKey {
    pub tx_hash: Hash,
    pub output_index: u32,
}

impl UTXOKey {
    pub fn new(tx_hash: Hash, output_index: u32) -> Self {
        Self {
            tx_hash,
            output_index,
        }
    }
}

/// Set of all unspent transaction outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UTXOSet {
    utxos: HashMap<UTXOKey, TxOutput>,
}

impl UTXOSet {
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
        }
    }

    pub fn contains(&self, key: &UTXOKey) -> bool {
        self.utxos.contains_key(key)
    }

    /// Output stored under `key`. Absence is `None`, never a zero-valued default.
    pub fn get(&self, key: &UTXOKey) -> Option<&TxOutput> {
        self.utxos.get(key)
    }

    /// Insert an output, replacing any existing entry under the same key
    pub fn add(&mut self, key: UTXOKey, output: TxOutput) {
        self.utxos.insert(key, output);
    }

    /// Remove a UTXO (when spent)
    pub fn remove(&mut self, key: &UTXOKey) -> Option<TxOutput> {
        self.utxos.remove(key)
    }

    /// Apply a transaction without validating it.
    ///
    /// Removes every claimed input and adds output `j` under `(tx.hash(), j)`.
    /// A coinbase has no inputs, so this also mints coinbase outputs.
    pub fn apply_transaction(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            self.remove(&input.utxo_key());
        }

        for (key, output) in tx.output_keys().zip(&tx.outputs) {
            self.add(key, output.clone());
        }
    }

    /// All UTXOs paying `recipient`
    pub fn get_by_recipient(&self, recipient: &PublicKey) -> Vec<(UTXOKey, &TxOutput)> {
        self.utxos
            .iter()
            .filter(|(_, output)| output.recipient == *recipient)
            .map(|(key, output)| (*key, output))
            .collect()
    }

    pub fn get_balance(&self, recipient: &PublicKey) -> i128 {
        self.get_by_recipient(recipient)
            .iter()
            .map(|(_, output)| output.value as i128)
            .sum()
    }

    /// Sum of every unspent output
    pub fn total_value(&self) -> i128 {
        self.utxos.values().map(|output| output.value as i128).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UTXOKey, &TxOutput)> {
        self.utxos.iter()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Value of the output under `key`, if present
    pub fn value_of(&self, key: &UTXOKey) -> Option<Amount> {
        self.get(key).map(|output| output.value)
    }
}
