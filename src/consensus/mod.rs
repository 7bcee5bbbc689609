//! Consensus module - blocks, the block tree and fork choice

mod block;
mod chain;
mod shared;

pub use block::*;
pub use chain::*;
pub use shared::*;
