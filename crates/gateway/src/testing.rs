//! In-memory `ChainClient` for tests and local runs without a node.

use crate::builder::ContractCall;
use crate::chain::{ChainClient, ChainError, ChainResult, Receipt};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokengate_common::types::{Address, TxHash};
use tokengate_crypto::SignedTransaction;

const DEFAULT_SIGNER_BALANCE: u128 = 1_000_000;

/// Chain double with scripted failures.
///
/// Queued errors are consumed one per call; once a queue is empty the call
/// succeeds. Transaction hashes are derived from a counter so every signed
/// transaction is distinct.
pub struct ScriptedChain {
    signer: Address,
    sign_failures: Mutex<VecDeque<ChainError>>,
    submit_failures: Mutex<VecDeque<ChainError>>,
    submit_delay: Option<Duration>,
    balances: Mutex<HashMap<Address, u128>>,
    allowances: Mutex<HashMap<(Address, Address), u128>>,
    pending: Mutex<HashMap<TxHash, ContractCall>>,
    submitted: Mutex<Vec<ContractCall>>,
    sign_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl ScriptedChain {
    pub fn new(signer: Address) -> Self {
        let mut balances = HashMap::new();
        balances.insert(signer, DEFAULT_SIGNER_BALANCE);

        Self {
            signer,
            sign_failures: Mutex::new(VecDeque::new()),
            submit_failures: Mutex::new(VecDeque::new()),
            submit_delay: None,
            balances: Mutex::new(balances),
            allowances: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            sign_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
        }
    }

    /// Every submission sleeps this long before answering.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub fn fail_sign_with(&self, err: ChainError) {
        lock(&self.sign_failures).push_back(err);
    }

    pub fn fail_submit_with(&self, err: ChainError) {
        lock(&self.submit_failures).push_back(err);
    }

    pub fn set_balance(&self, owner: Address, amount: u128) {
        lock(&self.balances).insert(owner, amount);
    }

    pub fn set_allowance(&self, owner: Address, spender: Address, amount: u128) {
        lock(&self.allowances).insert((owner, spender), amount);
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// `balance_of` and `allowance` calls
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Sign and submit calls combined
    pub fn write_calls(&self) -> usize {
        self.sign_calls() + self.submit_calls()
    }

    /// Calls the chain accepted, in order.
    pub fn submitted(&self) -> Vec<ContractCall> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn sign(&self, call: &ContractCall) -> ChainResult<SignedTransaction> {
        let n = self.sign_calls.fetch_add(1, Ordering::SeqCst) as u64;
        if let Some(err) = lock(&self.sign_failures).pop_front() {
            return Err(err);
        }

        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&(n + 1).to_be_bytes());
        let signed = SignedTransaction {
            nonce: n,
            raw: call.data.clone(),
            hash: TxHash(hash),
        };

        lock(&self.pending).insert(signed.hash, call.clone());
        Ok(signed)
    }

    async fn submit(&self, tx: &SignedTransaction) -> ChainResult<Receipt> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.submit_failures).pop_front() {
            return Err(err);
        }

        let call = lock(&self.pending)
            .remove(&tx.hash)
            .ok_or_else(|| ChainError::Rejected("unknown transaction".to_string()))?;
        lock(&self.submitted).push(call);

        Ok(Receipt {
            transaction_hash: tx.hash,
        })
    }

    async fn balance_of(&self, owner: &Address) -> ChainResult<u128> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.balances).get(owner).copied().unwrap_or(0))
    }

    async fn allowance(&self, owner: &Address, spender: &Address) -> ChainResult<u128> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.allowances).get(&(*owner, *spender)).copied().unwrap_or(0))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
