//! UTXO ledger validation core
//!
//! Decides which transactions are valid against a set of unspent outputs,
//! resolves conflicting batches, and keeps a forking block tree whose
//! retained history is bounded by a cutoff age below the tallest block.
//!
//! Transport, mining and key management are left to callers, which hand in
//! already-built `Transaction` and `Block` values.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod storage;
pub mod validation;

pub use config::ChainConfig;
pub use consensus::{Block, BlockChain, BlockError, ChainError, SharedBlockChain};
pub use storage::{TransactionPool, UTXOKey, UTXOSet};
pub use validation::{apply_batch, is_valid_tx, Transaction, TxError, TxHandler, TxInput, TxOutput};

/// Protocol constants
pub mod constants {
    /// Heights below the tallest block at which a parent may still be extended
    pub const CUTOFF_AGE: u64 = 10;
}
