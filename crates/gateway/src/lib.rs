//! Token gateway: faucet claims, transfers, approvals and mints in front of
//! a single token contract.
//!
//! Requests flow through the [`orchestrator::Orchestrator`], which gates
//! faucet claims on the durable [`ledger::ClaimLedger`] and signs every
//! transaction through a [`chain::ChainClient`].

pub mod api;
pub mod builder;
pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limiter;
pub mod testing;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use ledger::{ClaimLedger, ClaimRecord, DistributionRecord, LedgerStatistics};
pub use orchestrator::{Orchestrator, OrchestratorSettings, OutcomeStatus, TransactionOutcome};
