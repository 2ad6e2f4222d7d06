// Core ledger data structures

mod types;
mod transaction;
mod block;
mod serialize;
mod hash;
pub mod keys;
pub mod script;

pub use types::*;
pub use transaction::*;
pub use block::*;
pub use serialize::*;
pub use hash::*;
pub use keys::{KeyPair, Signature};
pub use script::Script;
