//! Transaction validation against a UTXO set
//!
//! A transaction is valid against a ledger snapshot when, checked in order:
//!
//! 1. every claimed output is present in the ledger,
//! 2. every input is signed by the recipient of the output it claims,
//! 3. no output is claimed twice by the same transaction,
//! 4. no output value is negative,
//! 5. input value covers output value.
//!
//! Any surplus in (5) is an implicit fee and is not credited to anyone.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::crypto::Hash;
use crate::storage::{UTXOKey, UTXOSet};
use crate::validation::{Amount, Transaction};

/// First failing check for a transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("Input claims output not in the UTXO set: {0:?}")]
    MissingInput(UTXOKey),
    #[error("Invalid signature on input {index}")]
    InvalidSignature { index: usize },
    #[error("Output claimed more than once: {0:?}")]
    DuplicateInput(UTXOKey),
    #[error("Negative value {value} on output {index}")]
    NegativeOutput { index: usize, value: Amount },
    #[error("Outputs exceed inputs: inputs={inputs}, outputs={outputs}")]
    Overspend { inputs: i128, outputs: i128 },
}

/// Check `tx` against `utxo_set`, returning its fee on success.
pub fn check_transaction(tx: &Transaction, utxo_set: &UTXOSet) -> Result<i128, TxError> {
    let mut input_sum: i128 = 0;
    for input in &tx.inputs {
        let key = input.utxo_key();
        let output = utxo_set.get(&key).ok_or(TxError::MissingInput(key))?;
        input_sum += output.value as i128;
    }

    for (index, input) in tx.inputs.iter().enumerate() {
        // presence was established above; a miss here is still a rejection
        let Some(output) = utxo_set.get(&input.utxo_key()) else {
            return Err(TxError::MissingInput(input.utxo_key()));
        };
        let signed = tx
            .signing_hash(index)
            .is_some_and(|message| output.recipient.verify(&message, &input.signature));
        if !signed {
            return Err(TxError::InvalidSignature { index });
        }
    }

    let mut claimed = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        let key = input.utxo_key();
        if !claimed.insert(key) {
            return Err(TxError::DuplicateInput(key));
        }
    }

    let mut output_sum: i128 = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 {
            return Err(TxError::NegativeOutput {
                index,
                value: output.value,
            });
        }
        output_sum += output.value as i128;
    }

    if output_sum > input_sum {
        return Err(TxError::Overspend {
            inputs: input_sum,
            outputs: output_sum,
        });
    }

    Ok(input_sum - output_sum)
}

/// Boolean form of [`check_transaction`]
pub fn is_valid_tx(tx: &Transaction, utxo_set: &UTXOSet) -> bool {
    match check_transaction(tx, utxo_set) {
        Ok(_) => true,
        Err(err) => {
            debug!(tx = %tx.hash().short(), %err, "transaction rejected");
            false
        }
    }
}

/// Resolve an unordered batch into a mutually consistent subset.
///
/// Candidates are taken in the order given. Each is checked against the
/// ledger as already mutated by the candidates accepted before it, so of two
/// transactions claiming the same output only the earlier can be accepted.
/// Rejected candidates are not retried. A candidate whose hash was already
/// accepted in this batch is skipped.
pub fn apply_batch(candidates: &[Transaction], utxo_set: &mut UTXOSet) -> Vec<Transaction> {
    let mut accepted = Vec::new();
    let mut accepted_hashes: HashSet<Hash> = HashSet::new();

    for tx in candidates {
        let hash = tx.hash();
        if accepted_hashes.contains(&hash) {
            continue;
        }
        if !is_valid_tx(tx, utxo_set) {
            continue;
        }
        utxo_set.apply_transaction(tx);
        accepted_hashes.insert(hash);
        accepted.push(tx.clone());
    }

    debug!(
        candidates = candidates.len(),
        accepted = accepted.len(),
        "batch resolved"
    );
    accepted
}

/// Validator owning a private copy of a UTXO set.
///
/// Accepted transactions are committed to that copy immediately, so later
/// checks see their effects. The caller's set is never touched.
#[derive(Debug, Clone)]
pub struct TxHandler {
    utxo_set: UTXOSet,
}

impl TxHandler {
    pub fn new(utxo_set: UTXOSet) -> Self {
        Self { utxo_set }
    }

    pub fn check_transaction(&self, tx: &Transaction) -> Result<i128, TxError> {
        check_transaction(tx, &self.utxo_set)
    }

    pub fn is_valid_tx(&self, tx: &Transaction) -> bool {
        is_valid_tx(tx, &self.utxo_set)
    }

    /// Check `tx` and commit it on success
    pub fn accept(&mut self, tx: &Transaction) -> Result<i128, TxError> {
        let fee = check_transaction(tx, &self.utxo_set)?;
        self.utxo_set.apply_transaction(tx);
        Ok(fee)
    }

    /// See [`apply_batch`]
    pub fn handle_txs(&mut self, candidates: &[Transaction]) -> Vec<Transaction> {
        apply_batch(candidates, &mut self.utxo_set)
    }

    pub fn utxo_set(&self) -> &UTXOSet {
        &self.utxo_set
    }

    pub fn into_utxo_set(self) -> UTXOSet {
        self.utxo_set
    }
}
