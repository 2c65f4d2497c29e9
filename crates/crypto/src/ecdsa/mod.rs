use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use std::fmt;
use thiserror::Error;
use tokengate_common::types::Address;

#[derive(Error, Debug)]
pub enum EcdsaError {
    #[error("Invalid Hex String")]
    HexError(#[from] hex::FromHexError),
    #[error("Invalid Key")]
    KeyError,
    #[error("Signing Failed")]
    SigningFailed,
    #[error("Signature Recovery Failed")]
    RecoveryFailed,
}

/// Recoverable secp256k1 signature split into its chain-encoding parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl RecoverableSignature {
    fn to_parts(&self) -> Result<(Signature, RecoveryId), EcdsaError> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        let signature = Signature::from_slice(&bytes).map_err(|_| EcdsaError::RecoveryFailed)?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id).ok_or(EcdsaError::RecoveryFailed)?;
        Ok((signature, recovery_id))
    }
}

/// Secp256k1 key the gateway signs its transactions with.
pub struct KeyPair {
    signing_key: SigningKey,
    address: Address,
}

impl KeyPair {
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self, EcdsaError> {
        let bytes = hex::decode(hex_str.trim().trim_start_matches("0x"))?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|_| EcdsaError::KeyError)?;
        let address = public_key_to_address(signing_key.verifying_key());
        Ok(Self { signing_key, address })
    }

    /// Chain account controlled by this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte digest; `s` is normalized to the lower half of the curve order.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, EcdsaError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|_| EcdsaError::SigningFailed)?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Ethereum-style address: last 20 bytes of keccak256 over the uncompressed public key.
pub fn public_key_to_address(public_key: &VerifyingKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag
    let hash = keccak_hash::keccak(&encoded.as_bytes()[1..]);
    let mut addr_bytes = [0u8; 20];
    addr_bytes.copy_from_slice(&hash.0[12..]);
    Address(addr_bytes)
}

/// Recovers the signing address from a digest and its recoverable signature.
pub fn recover_address(digest: &[u8; 32], signature: &RecoverableSignature) -> Result<Address, EcdsaError> {
    let (signature, recovery_id) = signature.to_parts()?;
    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| EcdsaError::RecoveryFailed)?;
    Ok(public_key_to_address(&key))
}
