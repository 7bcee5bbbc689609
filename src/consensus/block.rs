//! Block structure
//!
//! A block names its parent, carries exactly one coinbase and an ordered list
//! of regular transactions. Only the genesis block has no parent.

use serde::{Deserialize, Serialize};

use crate::crypto::{compute_merkle_root, hash_bytes, Hash};
use crate::validation::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Hash of the parent block; `None` only for genesis
    pub prev_hash: Option<Hash>,
    /// Value-minting transaction, exempt from input validation
    pub coinbase: Transaction,
    /// Regular transactions, validated in this order
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(prev_hash: Hash, coinbase: Transaction, transactions: Vec<Transaction>) -> Self {
        Self {
            prev_hash: Some(prev_hash),
            coinbase,
            transactions,
        }
    }

    pub fn genesis(coinbase: Transaction) -> Self {
        Self {
            prev_hash: None,
            coinbase,
            transactions: vec![],
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    /// A coinbase must not claim inputs
    pub fn is_well_formed(&self) -> bool {
        self.coinbase.is_coinbase()
    }

    /// Merkle root over the coinbase followed by the regular transactions
    pub fn merkle_root(&self) -> Hash {
        let hashes: Vec<Hash> = std::iter::once(&self.coinbase)
            .chain(&self.transactions)
            .map(Transaction::hash)
            .collect();
        compute_merkle_root(&hashes)
    }

    /// Block hash: parent link plus merkle root
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(65);
        match &self.prev_hash {
            Some(prev) => {
                bytes.push(1);
                bytes.extend_from_slice(&prev.0);
            }
            None => bytes.push(0),
        }
        bytes.extend_from_slice(&self.merkle_root().0);
        hash_bytes(&bytes)
    }
}
