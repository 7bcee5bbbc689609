//! Pending transaction pool
//!
//! Transactions announced to the chain but not yet included in an admitted
//! block. Keyed by transaction hash; iteration follows insertion order.

use std::collections::HashMap;

use crate::crypto::Hash;
use crate::validation::Transaction;

#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    txs: HashMap<Hash, Transaction>,
    order: Vec<Hash>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction. Returns false if one with the same hash is already pooled.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        let hash = tx.hash();
        if self.txs.contains_key(&hash) {
            return false;
        }
        self.order.push(hash);
        self.txs.insert(hash, tx);
        true
    }

    pub fn remove_transaction(&mut self, hash: &Hash) -> Option<Transaction> {
        let tx = self.txs.remove(hash)?;
        self.order.retain(|h| h != hash);
        Some(tx)
    }

    /// Drop every pooled transaction whose hash is in `hashes`
    pub fn remove_all<'a>(&mut self, hashes: impl IntoIterator<Item = &'a Hash>) -> usize {
        let before = self.txs.len();
        for hash in hashes {
            self.txs.remove(hash);
        }
        let txs = &self.txs;
        self.order.retain(|h| txs.contains_key(h));
        before - self.txs.len()
    }

    /// Keep only transactions for which `keep` returns true. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&Transaction) -> bool) -> usize {
        let before = self.txs.len();
        self.txs.retain(|_, tx| keep(&*tx));
        let txs = &self.txs;
        self.order.retain(|h| txs.contains_key(h));
        before - self.txs.len()
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.txs.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    /// Pooled transactions in insertion order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.order
            .iter()
            .filter_map(|hash| self.txs.get(hash).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
