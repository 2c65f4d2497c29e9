//! Turns validated intents into token-contract calls.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokengate_common::types::Address;
use tokengate_crypto::abi::{self, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Transfer,
    Approve,
    Mint,
}

impl IntentKind {
    /// Canonical contract function signature
    pub fn signature(&self) -> &'static str {
        match self {
            IntentKind::Transfer => "transfer(address,uint256)",
            IntentKind::Approve => "approve(address,uint256)",
            IntentKind::Mint => "mint(address,uint256)",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Transfer => "transfer",
            IntentKind::Approve => "approve",
            IntentKind::Mint => "mint",
        }
    }

    /// Name of the request field carrying the counterparty.
    pub fn target_field(&self) -> &'static str {
        match self {
            IntentKind::Approve => "spenderAddress",
            IntentKind::Transfer | IntentKind::Mint => "recipientAddress",
        }
    }

    fn is_capped(&self) -> bool {
        matches!(self, IntentKind::Transfer | IntentKind::Mint)
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired contract call. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    kind: IntentKind,
    from: Address,
    to: Address,
    amount: u128,
}

impl TransferIntent {
    pub fn new(kind: IntentKind, from: Address, to: Address, amount: u128) -> Self {
        Self { kind, from, to, amount }
    }

    pub fn kind(&self) -> IntentKind {
        self.kind
    }

    pub fn from(&self) -> Address {
        self.from
    }

    /// Recipient or spender
    pub fn to(&self) -> Address {
        self.to
    }

    pub fn amount(&self) -> u128 {
        self.amount
    }
}

/// Unsigned payload addressed to the token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub kind: IntentKind,
    pub from: Address,
    pub contract: Address,
    pub data: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0} must not be the zero address")]
    ZeroAddress(&'static str),

    #[error("amount must be a positive integer")]
    ZeroAmount,

    #[error("amount {amount} exceeds the per-request maximum of {cap}")]
    AmountExceedsCap { amount: u128, cap: u128 },

    #[error("cannot transfer to the sending account")]
    SelfTransfer,
}

impl BuildError {
    /// Request field the failure is attributed to.
    pub fn field(&self, kind: IntentKind) -> &'static str {
        match self {
            BuildError::ZeroAddress(field) => field,
            BuildError::ZeroAmount | BuildError::AmountExceedsCap { .. } => "amount",
            BuildError::SelfTransfer => kind.target_field(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    contract: Address,
    max_amount: u128,
}

impl TransactionBuilder {
    pub fn new(contract: Address, max_amount: u128) -> Self {
        Self { contract, max_amount }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn validate(&self, intent: &TransferIntent) -> Result<(), BuildError> {
        if intent.from.is_zero() {
            return Err(BuildError::ZeroAddress("from"));
        }
        if intent.to.is_zero() {
            return Err(BuildError::ZeroAddress(intent.kind.target_field()));
        }
        if intent.amount == 0 {
            return Err(BuildError::ZeroAmount);
        }
        if intent.kind.is_capped() && intent.amount > self.max_amount {
            return Err(BuildError::AmountExceedsCap {
                amount: intent.amount,
                cap: self.max_amount,
            });
        }
        if intent.kind == IntentKind::Transfer && intent.to == intent.from {
            return Err(BuildError::SelfTransfer);
        }
        Ok(())
    }

    pub fn build(&self, intent: &TransferIntent) -> Result<ContractCall, BuildError> {
        self.validate(intent)?;

        let data = abi::encode_call(
            intent.kind.signature(),
            &[Token::Address(intent.to), Token::Uint(intent.amount)],
        );

        Ok(ContractCall {
            kind: intent.kind,
            from: intent.from,
            contract: self.contract,
            data,
        })
    }
}
