//! Transaction structure and content hashing
//!
//! A transaction claims ledger outputs through its inputs and creates new
//! outputs. Its hash and the per-input signing payloads both exclude input
//! signatures, so a transaction can be hashed before it is signed.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature};
use crate::storage::UTXOKey;

/// Signed amount; outputs are required to be non-negative by validation,
/// not by the type.
pub type Amount = i64;

/// A transaction input claiming a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Hash of the transaction containing the output
    pub prev_tx_hash: Hash,
    /// Index of the output in that transaction
    pub output_index: u32,
    /// Signature by the output's recipient over `signing_hash(i)`
    pub signature: SchnorrSignature,
}

impl TxInput {
    /// Unsigned input; call [`Transaction::sign_input`] once outputs are final
    pub fn new(prev_tx_hash: Hash, output_index: u32) -> Self {
        Self {
            prev_tx_hash,
            output_index,
            signature: SchnorrSignature([0u8; 64]),
        }
    }

    /// Ledger key of the output this input claims
    pub fn utxo_key(&self) -> UTXOKey {
        UTXOKey::new(self.prev_tx_hash, self.output_index)
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub recipient: PublicKey,
}

impl TxOutput {
    pub fn new(value: Amount, recipient: PublicKey) -> Self {
        Self { value, recipient }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Free-form tag; coinbases carry their block height here
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Value-minting transaction with no inputs.
    ///
    /// `height` keeps coinbases paying the same recipient on different
    /// blocks from sharing a hash.
    pub fn coinbase(height: u32, value: Amount, recipient: PublicKey) -> Self {
        Self {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput::new(value, recipient)],
            lock_time: height,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Content hash over every field except input signatures
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(16 + self.inputs.len() * 36 + self.outputs.len() * 40);
        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            Self::write_outpoint(&mut bytes, input);
        }

        self.write_outputs(&mut bytes);
        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        hash_bytes(&bytes)
    }

    /// Payload signed by the owner of the output claimed by input `index`.
    ///
    /// Covers that input's outpoint and all outputs. Returns `None` for an
    /// out-of-range index.
    pub fn signing_hash(&self, index: usize) -> Option<Hash> {
        let input = self.inputs.get(index)?;

        let mut bytes = Vec::with_capacity(48 + self.outputs.len() * 40);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(index as u32).to_le_bytes());
        Self::write_outpoint(&mut bytes, input);
        self.write_outputs(&mut bytes);
        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        Some(hash_bytes(&bytes))
    }

    /// Sign input `index` with `key`. Returns false for an out-of-range index.
    pub fn sign_input(&mut self, index: usize, key: &PrivateKey) -> bool {
        let Some(message) = self.signing_hash(index) else {
            return false;
        };
        self.inputs[index].signature = key.sign(&message);
        true
    }

    /// Ledger keys of this transaction's outputs, in output order
    pub fn output_keys(&self) -> impl Iterator<Item = UTXOKey> + '_ {
        let hash = self.hash();
        (0..self.outputs.len() as u32).map(move |index| UTXOKey::new(hash, index))
    }

    fn write_outpoint(bytes: &mut Vec<u8>, input: &TxInput) {
        bytes.extend_from_slice(&input.prev_tx_hash.0);
        bytes.extend_from_slice(&input.output_index.to_le_bytes());
    }

    fn write_outputs(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.value.to_le_bytes());
            bytes.extend_from_slice(&output.recipient.0);
        }
    }
}
