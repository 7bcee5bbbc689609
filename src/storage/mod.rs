//! Storage module - UTXO set and pending transaction pool

mod pool;
mod utxo;

pub use pool::*;
pub use utxo::*;
