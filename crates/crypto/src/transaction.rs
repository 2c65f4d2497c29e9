//! EIP-155 legacy transactions: RLP encoding, signing and hashing.

use crate::ecdsa::{EcdsaError, KeyPair, RecoverableSignature};
use rlp::RlpStream;
use thiserror::Error;
use tokengate_common::types::{Address, TxHash};

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Signing failed: {0}")]
    Signing(#[from] EcdsaError),
    #[error("Invalid chain id: {0}")]
    InvalidChainId(u64),
}

/// Unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// Signed, broadcast-ready transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub nonce: u64,
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

impl SignedTransaction {
    /// `0x`-prefixed hex form accepted by `eth_sendRawTransaction`.
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl LegacyTransaction {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&trim_be(&self.gas_price.to_be_bytes()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&trim_be(&self.value.to_be_bytes()));
        stream.append(&self.data);
    }

    /// RLP payload hashed for signing: the six fields followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.append_fields(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak_hash::keccak(self.signing_payload()).0
    }

    pub fn sign(&self, key: &KeyPair) -> Result<SignedTransaction, TxError> {
        if self.chain_id == 0 {
            return Err(TxError::InvalidChainId(self.chain_id));
        }
        let signature = key.sign_prehash(&self.signing_hash())?;
        let raw = self.encode_signed(&signature)?;
        let hash = TxHash(keccak_hash::keccak(&raw).0);

        Ok(SignedTransaction {
            nonce: self.nonce,
            raw,
            hash,
        })
    }

    fn encode_signed(&self, signature: &RecoverableSignature) -> Result<Vec<u8>, TxError> {
        let v = self
            .chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + u64::from(signature.recovery_id)))
            .ok_or(TxError::InvalidChainId(self.chain_id))?;

        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&trim_be(&signature.r));
        stream.append(&trim_be(&signature.s));
        Ok(stream.out().to_vec())
    }
}

/// RLP scalars are big-endian without leading zero bytes.
fn trim_be(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecdsa::recover_address;
    use rlp::Rlp;

    // Reference transaction from EIP-155
    fn eip155_example() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: "0x3535353535353535353535353535353535353535".parse().unwrap(),
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
            chain_id: 1,
        }
    }

    fn eip155_key() -> KeyPair {
        KeyPair::from_private_key_hex(&"46".repeat(32)).unwrap()
    }

    #[test]
    fn test_signing_payload_matches_eip155() {
        let tx = eip155_example();
        assert_eq!(
            hex::encode(tx.signing_payload()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_signed_transaction_matches_eip155() {
        let signed = eip155_example().sign(&eip155_key()).unwrap();
        assert_eq!(
            hex::encode(&signed.raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
        assert_eq!(signed.hash, TxHash(keccak_hash::keccak(&signed.raw).0));
        assert!(signed.raw_hex().starts_with("0xf86c"));
    }

    #[test]
    fn test_signature_recovers_sender() {
        let key = eip155_key();
        let tx = LegacyTransaction {
            data: vec![0xa9, 0x05, 0x9c, 0xbb],
            chain_id: 31337,
            ..eip155_example()
        };
        let signed = tx.sign(&key).unwrap();

        let rlp = Rlp::new(&signed.raw);
        assert_eq!(rlp.item_count().unwrap(), 9);

        let v: u64 = rlp.val_at(6).unwrap();
        let r: Vec<u8> = rlp.val_at(7).unwrap();
        let s: Vec<u8> = rlp.val_at(8).unwrap();

        let mut sig = RecoverableSignature {
            r: [0u8; 32],
            s: [0u8; 32],
            recovery_id: (v - 35 - 31337 * 2) as u8,
        };
        sig.r[32 - r.len()..].copy_from_slice(&r);
        sig.s[32 - s.len()..].copy_from_slice(&s);

        assert_eq!(recover_address(&tx.signing_hash(), &sig).unwrap(), key.address());
    }

    #[test]
    fn test_zero_chain_id_rejected() {
        let tx = LegacyTransaction { chain_id: 0, ..eip155_example() };
        assert!(matches!(tx.sign(&eip155_key()), Err(TxError::InvalidChainId(0))));
    }

    #[test]
    fn test_oversized_chain_id_rejected() {
        let tx = LegacyTransaction {
            chain_id: u64::MAX / 2,
            ..eip155_example()
        };
        assert!(matches!(tx.sign(&eip155_key()), Err(TxError::InvalidChainId(id)) if id == u64::MAX / 2));
    }

    #[test]
    fn test_trim_be() {
        assert_eq!(trim_be(&[0, 0, 1, 0]), vec![1, 0]);
        assert!(trim_be(&[0, 0]).is_empty());
    }
}
