//! Validation module - transactions and the rules that admit them

mod transaction;
mod validator;

pub use transaction::*;
pub use validator::*;
