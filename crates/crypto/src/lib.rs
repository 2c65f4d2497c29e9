pub mod abi;
pub mod ecdsa;
pub mod transaction;

pub use ecdsa::{EcdsaError, KeyPair, RecoverableSignature};
pub use transaction::{LegacyTransaction, SignedTransaction, TxError};
