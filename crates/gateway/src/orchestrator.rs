//! Request orchestration.
//!
//! Every request walks `Received -> Validated -> RateChecked -> Built ->
//! Submitted` and ends in exactly one of `Accepted`, `Rejected` or `Failed`.
//! `RateChecked` only applies to faucet claims. The ledger is written only
//! after the chain accepted a claim, inside the claimant's critical section.

use crate::builder::{BuildError, ContractCall, IntentKind, TransactionBuilder, TransferIntent};
use crate::chain::{BroadcastState, ChainClient, ChainError, Receipt};
use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::{AddressLocks, ClaimLedger, ClaimRecord, DistributionRecord, LedgerStatistics};
use crate::metrics::GatewayMetrics;
use crate::rate_limiter::{RateDecision, RateLimiter};
use dashmap::DashSet;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokengate_common::types::{Address, TxHash};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Runtime policy injected at construction.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub token_contract: Address,
    /// Tokens sent per faucet claim (minor units)
    pub dispense_amount: u128,
    /// Cap for a single transfer or mint (minor units)
    pub max_amount_per_request: u128,
    pub claim_window: Duration,
    /// Retries after the first attempt, pre-broadcast failures only
    pub max_submit_retries: u32,
    /// Retry `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    /// Bound on each sign and submit call
    pub chain_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn with_contract(token_contract: Address) -> Self {
        Self {
            token_contract,
            dispense_amount: 100,
            max_amount_per_request: 1_000_000,
            claim_window: Duration::from_secs(86_400),
            max_submit_retries: 2,
            retry_backoff: Duration::from_millis(500),
            chain_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Validated,
    RateChecked,
    Built,
    Submitted,
    Accepted,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    Accepted,
    Rejected,
    Failed,
}

impl OutcomeStatus {
    fn terminal_state(&self) -> RequestState {
        match self {
            OutcomeStatus::Accepted => RequestState::Accepted,
            OutcomeStatus::Rejected => RequestState::Rejected,
            OutcomeStatus::Failed => RequestState::Failed,
        }
    }
}

/// Final result of one orchestrated request. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub status: OutcomeStatus,
    pub transaction_hash: Option<TxHash>,
    pub error_detail: Option<String>,
}

impl TransactionOutcome {
    pub fn accepted(transaction_hash: TxHash) -> Self {
        Self {
            status: OutcomeStatus::Accepted,
            transaction_hash: Some(transaction_hash),
            error_detail: None,
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Rejected,
            transaction_hash: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn failed(transaction_hash: Option<TxHash>, detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            transaction_hash,
            error_detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub address: Address,
    #[serde(serialize_with = "as_decimal")]
    pub amount: u128,
    pub transaction_hash: TxHash,
    /// Faucet token balance after this claim, when it could be read
    #[serde(serialize_with = "as_optional_decimal")]
    pub remaining_balance: Option<u128>,
    /// Epoch milliseconds recorded in the ledger
    pub claimed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub kind: IntentKind,
    pub from: Address,
    pub to: Address,
    #[serde(serialize_with = "as_decimal")]
    pub amount: u128,
    pub transaction_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStatus {
    pub address: Address,
    pub token_contract: Address,
    #[serde(serialize_with = "as_optional_decimal")]
    pub balance: Option<u128>,
    #[serde(serialize_with = "as_decimal")]
    pub dispense_amount: u128,
    pub claim_window_secs: u64,
    #[serde(flatten)]
    pub statistics: LedgerStatistics,
}

/// Amounts leave the service as decimal strings; JSON numbers lose precision past 2^53.
pub(crate) fn as_decimal<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn as_optional_decimal<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_str(&value.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Removes the in-flight marker for a claimant on every exit path.
struct InFlightClaim<'a> {
    in_flight: &'a DashSet<Address>,
    address: Address,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.address);
    }
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    builder: TransactionBuilder,
    limiter: RateLimiter,
    ledger: Arc<ClaimLedger>,
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    metrics: Arc<GatewayMetrics>,
    locks: AddressLocks,
    /// Claimants whose transaction is between rate check and ledger write
    in_flight: DashSet<Address>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        ledger: Arc<ClaimLedger>,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let builder = TransactionBuilder::new(settings.token_contract, settings.max_amount_per_request);
        let limiter = RateLimiter::new(settings.claim_window);

        Self {
            settings,
            builder,
            limiter,
            ledger,
            chain,
            clock,
            metrics,
            locks: AddressLocks::new(),
            in_flight: DashSet::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &ClaimLedger {
        &self.ledger
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn signer_address(&self) -> Address {
        self.chain.signer_address()
    }

    /// Dispenses the configured amount to `raw_address`, at most once per window.
    pub async fn claim(&self, raw_address: &str) -> GatewayResult<ClaimReceipt> {
        let result = self.run_claim(raw_address).await;
        self.finish("claim", &result, |receipt| receipt.transaction_hash);
        result
    }

    /// Transfers, approves or mints on behalf of the signing account.
    pub async fn execute(&self, kind: IntentKind, raw_target: &str, amount: u128) -> GatewayResult<TransferReceipt> {
        let result = self.run_intent(kind, raw_target, amount).await;
        self.finish(kind.as_str(), &result, |receipt| receipt.transaction_hash);
        result
    }

    pub async fn balance(&self, raw_address: &str) -> GatewayResult<u128> {
        let address = parse_address(raw_address, "address")?;
        self.chain
            .balance_of(&address)
            .await
            .map_err(|e| GatewayError::from_chain(e, 1))
    }

    pub async fn allowance(&self, raw_owner: &str, raw_spender: &str) -> GatewayResult<u128> {
        let owner = parse_address(raw_owner, "owner")?;
        let spender = parse_address(raw_spender, "spender")?;
        self.chain
            .allowance(&owner, &spender)
            .await
            .map_err(|e| GatewayError::from_chain(e, 1))
    }

    /// Ledger dump
    pub fn history(&self) -> GatewayResult<Vec<ClaimRecord>> {
        self.ledger.records().map_err(storage_error(None))
    }

    pub async fn status(&self) -> GatewayResult<FaucetStatus> {
        let signer = self.chain.signer_address();
        let balance = match self.chain.balance_of(&signer).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("Faucet balance unavailable: {}", e);
                None
            }
        };
        let statistics = self.ledger.statistics().map_err(storage_error(None))?;

        Ok(FaucetStatus {
            address: signer,
            token_contract: self.settings.token_contract,
            balance,
            dispense_amount: self.settings.dispense_amount,
            claim_window_secs: self.settings.claim_window.as_secs(),
            statistics,
        })
    }

    /// Housekeeping: prune old history and idle per-address locks.
    pub async fn prune(&self, retention_days: i64) -> GatewayResult<usize> {
        let removed = self
            .ledger
            .prune_distributions(retention_days, self.clock.now_millis())
            .await
            .map_err(storage_error(None))?;
        let idle = self.locks.prune_idle();
        debug!("Released {} idle address locks", idle);
        Ok(removed)
    }

    async fn run_claim(&self, raw_address: &str) -> GatewayResult<ClaimReceipt> {
        trace_state("claim", RequestState::Received);

        let address = parse_address(raw_address, "address")?;
        let intent = TransferIntent::new(
            IntentKind::Transfer,
            self.chain.signer_address(),
            address,
            self.settings.dispense_amount,
        );
        self.builder.validate(&intent).map_err(|e| {
            let field = match e {
                BuildError::ZeroAmount | BuildError::AmountExceedsCap { .. } => "amount",
                _ => "address",
            };
            GatewayError::validation(field, e.to_string())
        })?;
        trace_state("claim", RequestState::Validated);

        let decided_at = self.reserve_claim(&address).await?;
        let _in_flight = InFlightClaim {
            in_flight: &self.in_flight,
            address,
        };
        trace_state("claim", RequestState::RateChecked);

        let available = self.check_funds(intent.amount()).await?;

        let call = self
            .builder
            .build(&intent)
            .map_err(|e| GatewayError::Build(e.to_string()))?;
        trace_state("claim", RequestState::Built);

        let receipt = self.submit_with_retry(&call).await?;

        self.persist_claim(&address, decided_at, intent.amount(), &receipt)
            .await?;

        info!(
            address = %address,
            tx_hash = %receipt.transaction_hash,
            "Successfully dispensed {} tokens",
            intent.amount()
        );

        Ok(ClaimReceipt {
            address,
            amount: intent.amount(),
            transaction_hash: receipt.transaction_hash,
            remaining_balance: available.map(|balance| balance.saturating_sub(intent.amount())),
            claimed_at: decided_at,
        })
    }

    async fn run_intent(&self, kind: IntentKind, raw_target: &str, amount: u128) -> GatewayResult<TransferReceipt> {
        trace_state(kind.as_str(), RequestState::Received);

        let target = parse_address(raw_target, kind.target_field())?;
        let intent = TransferIntent::new(kind, self.chain.signer_address(), target, amount);
        self.builder
            .validate(&intent)
            .map_err(|e| GatewayError::validation(e.field(kind), e.to_string()))?;
        trace_state(kind.as_str(), RequestState::Validated);

        let call = self
            .builder
            .build(&intent)
            .map_err(|e| GatewayError::Build(e.to_string()))?;
        trace_state(kind.as_str(), RequestState::Built);

        let receipt = self.submit_with_retry(&call).await?;

        Ok(TransferReceipt {
            kind,
            from: intent.from(),
            to: intent.to(),
            amount: intent.amount(),
            transaction_hash: receipt.transaction_hash,
        })
    }

    /// Rate check under the claimant's lock. On success the claimant is
    /// marked in flight and the decision timestamp is returned.
    async fn reserve_claim(&self, address: &Address) -> GatewayResult<i64> {
        let _guard = self.locks.lock(address).await;

        if self.in_flight.contains(address) {
            debug!(address = %address, "Claim already in flight");
            return Err(GatewayError::RateLimited { retry_after_secs: 1 });
        }

        let now = self.clock.now_millis();
        let last_claim_at = self.ledger.get(address).map_err(storage_error(None))?;

        match self.limiter.allow(last_claim_at, now) {
            RateDecision::Allow => {
                self.in_flight.insert(*address);
                Ok(now)
            }
            RateDecision::Deny { retry_after_ms } => {
                warn!(address = %address, "Address requested too soon. Remaining: {}ms", retry_after_ms);
                Err(GatewayError::RateLimited {
                    retry_after_secs: ceil_secs(retry_after_ms),
                })
            }
        }
    }

    /// Faucet balance pre-check. A failed read is not fatal; the chain has
    /// the final word on funds.
    async fn check_funds(&self, required: u128) -> GatewayResult<Option<u128>> {
        let signer = self.chain.signer_address();
        match timeout(self.settings.chain_timeout, self.chain.balance_of(&signer)).await {
            Ok(Ok(available)) if available < required => {
                warn!("Faucet balance low: {}", available);
                Err(GatewayError::InsufficientFunds { available, required })
            }
            Ok(Ok(available)) => Ok(Some(available)),
            Ok(Err(e)) => {
                warn!("Skipping faucet balance check: {}", e);
                Ok(None)
            }
            Err(_) => {
                warn!("Skipping faucet balance check: timed out");
                Ok(None)
            }
        }
    }

    /// Re-checks and writes the ledger after the chain accepted the claim.
    async fn persist_claim(
        &self,
        address: &Address,
        decided_at: i64,
        amount: u128,
        receipt: &Receipt,
    ) -> GatewayResult<()> {
        let tx_hash = receipt.transaction_hash;
        let _guard = self.locks.lock(address).await;

        let current = self.ledger.get(address).map_err(storage_error(Some(tx_hash)))?;

        if !self.limiter.allow(current, decided_at).is_allowed() {
            // Both transactions are on chain; only the later timestamp is kept
            warn!(
                address = %address,
                tx_hash = %tx_hash,
                recorded = ?current,
                decided_at,
                "Concurrent accepted claims for one address; tokens dispensed twice"
            );
            self.metrics.double_allocations_total.inc();
        }

        if current.map_or(true, |recorded| recorded < decided_at) {
            self.ledger
                .set(address, decided_at)
                .await
                .map_err(storage_error(Some(tx_hash)))?;
            self.metrics.ledger_writes_total.inc();
        }

        let record = DistributionRecord::new(*address, amount, tx_hash, decided_at);
        if let Err(e) = self.ledger.record_distribution(&record).await {
            // History only feeds statistics
            warn!(address = %address, tx_hash = %tx_hash, "Failed to record distribution: {}", e);
        }

        Ok(())
    }

    async fn submit_with_retry(&self, call: &ContractCall) -> GatewayResult<Receipt> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let result = loop {
            attempt += 1;
            match self.sign_and_submit(call).await {
                Ok(receipt) => break Ok(receipt),
                Err(err) if err.is_retryable() && attempt <= self.settings.max_submit_retries => {
                    let delay = self.settings.retry_backoff * attempt;
                    warn!(
                        kind = %call.kind,
                        attempt,
                        "Pre-broadcast network failure, retrying in {:?}: {}",
                        delay,
                        err
                    );
                    self.metrics.submit_retries_total.inc();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => break Err(GatewayError::from_chain(err, attempt)),
            }
        };

        self.metrics
            .chain_submit_seconds
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn sign_and_submit(&self, call: &ContractCall) -> Result<Receipt, ChainError> {
        let signed = match timeout(self.settings.chain_timeout, self.chain.sign(call)).await {
            Ok(result) => result.map_err(ChainError::before_broadcast)?,
            Err(_) => {
                return Err(ChainError::network(
                    format!("signing timed out after {:?}", self.settings.chain_timeout),
                    BroadcastState::NotBroadcast,
                ))
            }
        };

        trace_state(call.kind.as_str(), RequestState::Submitted);

        match timeout(self.settings.chain_timeout, self.chain.submit(&signed)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::network(
                format!("submission of {} timed out after {:?}", signed.hash, self.settings.chain_timeout),
                BroadcastState::Ambiguous,
            )),
        }
    }

    fn finish<T>(&self, operation: &str, result: &GatewayResult<T>, hash: impl Fn(&T) -> TxHash) {
        let outcome = match result {
            Ok(value) => TransactionOutcome::accepted(hash(value)),
            Err(err) => err.outcome(),
        };
        let label = match result {
            Ok(_) => "accepted",
            Err(err) => err.code(),
        };

        trace_state(operation, outcome.status.terminal_state());
        self.metrics.record_request(operation, label);

        match outcome.status {
            OutcomeStatus::Accepted => {}
            OutcomeStatus::Rejected => info!(operation, outcome = ?outcome, "Request rejected"),
            OutcomeStatus::Failed => error!(operation, outcome = ?outcome, "Request failed"),
        }
    }
}

fn trace_state(operation: &str, state: RequestState) {
    debug!(operation, state = ?state, "Request state");
}

fn parse_address(raw: &str, field: &'static str) -> GatewayResult<Address> {
    raw.parse::<Address>()
        .map_err(|e| GatewayError::validation(field, e.to_string()))
}

fn storage_error(transaction_hash: Option<TxHash>) -> impl Fn(crate::ledger::LedgerError) -> GatewayError {
    move |e| {
        error!("Ledger failure: {}", e);
        GatewayError::Storage {
            detail: e.to_string(),
            transaction_hash,
        }
    }
}

fn ceil_secs(millis: i64) -> u64 {
    u64::try_from(millis.max(0)).unwrap_or(0).div_ceil(1_000)
}
