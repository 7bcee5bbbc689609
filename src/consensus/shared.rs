//! Thread-safe chain handle
//!
//! One mutex guards the whole chain, so an admission's parent lookup, max
//! height check and insert happen atomically with respect to readers and to
//! other admissions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::consensus::{Block, BlockChain, BlockError};
use crate::storage::UTXOSet;
use crate::validation::Transaction;

#[derive(Debug, Clone)]
pub struct SharedBlockChain {
    inner: Arc<Mutex<BlockChain>>,
}

impl SharedBlockChain {
    pub fn new(chain: BlockChain) -> Self {
        Self {
            inner: Arc::new(Mutex::new(chain)),
        }
    }

    /// Admission mutates only after validation succeeds, so a poisoned lock
    /// still guards a consistent chain.
    fn lock(&self) -> MutexGuard<'_, BlockChain> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_block(&self, block: &Block) -> bool {
        self.lock().add_block(block)
    }

    pub fn try_add_block(&self, block: &Block) -> Result<u64, BlockError> {
        self.lock().try_add_block(block)
    }

    pub fn add_transaction(&self, tx: Transaction) -> bool {
        self.lock().add_transaction(tx)
    }

    pub fn max_height_block(&self) -> Block {
        self.lock().get_max_height_block().clone()
    }

    pub fn max_height_utxo_set(&self) -> UTXOSet {
        self.lock().get_max_height_utxo_set()
    }

    pub fn max_height(&self) -> u64 {
        self.lock().max_height()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.lock().get_transaction_pool().transactions()
    }

    /// Run `f` against the chain under the lock
    pub fn with_chain<R>(&self, f: impl FnOnce(&BlockChain) -> R) -> R {
        f(&self.lock())
    }
}
