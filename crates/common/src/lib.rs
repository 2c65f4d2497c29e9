pub mod error;
pub mod types;
pub mod utils;

pub use error::{AddressError, CommonError};
pub use types::{Address, TxHash};
