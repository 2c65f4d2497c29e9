//! Shared harness for gateway integration tests.

#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokengate_common::types::Address;
use tokengate_common::utils::logging::init_test_logging;
use tokengate_gateway::api::{router, RouterOptions};
use tokengate_gateway::clock::ManualClock;
use tokengate_gateway::metrics::GatewayMetrics;
use tokengate_gateway::testing::ScriptedChain;
use tokengate_gateway::{ClaimLedger, Orchestrator, OrchestratorSettings};

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

pub const SIGNER: Address = Address([0xfa; 20]);
pub const CONTRACT: Address = Address([0xcc; 20]);

pub fn claimant() -> Address {
    Address([0xab; 20])
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub chain: Arc<ScriptedChain>,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<ClaimLedger>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_chain(ScriptedChain::new(SIGNER))
    }

    pub fn with_chain(chain: ScriptedChain) -> Self {
        init_test_logging();

        let chain = Arc::new(chain);
        let clock = Arc::new(ManualClock::new(0));
        let ledger = Arc::new(ClaimLedger::temporary().unwrap());

        let mut settings = OrchestratorSettings::with_contract(CONTRACT);
        settings.retry_backoff = Duration::from_millis(1);

        let orchestrator = Arc::new(Orchestrator::new(
            settings,
            ledger.clone(),
            chain.clone(),
            clock.clone(),
            Arc::new(GatewayMetrics::new().unwrap()),
        ));

        Self {
            orchestrator,
            chain,
            clock,
            ledger,
        }
    }

    pub fn router(&self) -> Router {
        router(self.orchestrator.clone(), RouterOptions::default())
    }
}
