//! Minimal Solidity ABI support for the token contract calls the gateway issues.
//!
//! Only static `address` and `uint256` arguments are needed, so every argument
//! occupies exactly one 32-byte word after the 4-byte selector.

use thiserror::Error;
use tokengate_common::types::Address;

pub const WORD_SIZE: usize = 32;
pub const SELECTOR_SIZE: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AbiError {
    #[error("return data too short: {0} bytes")]
    ShortData(usize),
    #[error("uint256 value does not fit in 128 bits")]
    Overflow,
}

/// Static ABI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(u128),
}

/// First four bytes of keccak256 over the canonical function signature.
pub fn function_selector(signature: &str) -> [u8; SELECTOR_SIZE] {
    let hash = keccak_hash::keccak(signature.as_bytes());
    let mut selector = [0u8; SELECTOR_SIZE];
    selector.copy_from_slice(&hash.0[..SELECTOR_SIZE]);
    selector
}

pub fn encode_address(address: &Address) -> [u8; WORD_SIZE] {
    let mut word = [0u8; WORD_SIZE];
    word[12..].copy_from_slice(&address.0);
    word
}

pub fn encode_uint(value: u128) -> [u8; WORD_SIZE] {
    let mut word = [0u8; WORD_SIZE];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Encodes `signature(args...)` as call data.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = Vec::with_capacity(SELECTOR_SIZE + args.len() * WORD_SIZE);
    data.extend_from_slice(&function_selector(signature));
    for arg in args {
        match arg {
            Token::Address(address) => data.extend_from_slice(&encode_address(address)),
            Token::Uint(value) => data.extend_from_slice(&encode_uint(*value)),
        }
    }
    data
}

/// Decodes the first return word as an unsigned integer.
pub fn decode_uint(data: &[u8]) -> Result<u128, AbiError> {
    if data.len() < WORD_SIZE {
        return Err(AbiError::ShortData(data.len()));
    }
    if data[..16].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[16..WORD_SIZE]);
    Ok(u128::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erc20_selectors() {
        assert_eq!(hex::encode(function_selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(function_selector("approve(address,uint256)")), "095ea7b3");
        assert_eq!(hex::encode(function_selector("mint(address,uint256)")), "40c10f19");
        assert_eq!(hex::encode(function_selector("balanceOf(address)")), "70a08231");
        assert_eq!(hex::encode(function_selector("allowance(address,address)")), "dd62ed3e");
    }

    #[test]
    fn test_encode_transfer_call() {
        let to: Address = "0x3535353535353535353535353535353535353535".parse().unwrap();
        let data = encode_call("transfer(address,uint256)", &[Token::Address(to), Token::Uint(100)]);

        assert_eq!(data.len(), SELECTOR_SIZE + 2 * WORD_SIZE);
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], &to.0);
        assert_eq!(data[67], 100);
    }

    #[test]
    fn test_decode_uint() {
        assert_eq!(decode_uint(&encode_uint(u128::MAX)).unwrap(), u128::MAX);
        assert_eq!(decode_uint(&[0u8; 4]), Err(AbiError::ShortData(4)));

        let mut huge = [0u8; WORD_SIZE];
        huge[0] = 1;
        assert_eq!(decode_uint(&huge), Err(AbiError::Overflow));
    }
}
