use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder,
};

/// Prometheus collectors for the gateway
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    /// Orchestrated requests by operation and outcome
    pub requests_total: IntCounterVec,
    /// Pre-broadcast network failures that were retried
    pub submit_retries_total: IntCounter,
    /// Ledger entries written after accepted claims
    pub ledger_writes_total: IntCounter,
    /// Accepted claims that lost the post-submission ledger re-check
    pub double_allocations_total: IntCounter,
    /// Sign-and-submit latency
    pub chain_submit_seconds: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tokengate".to_string()), None)?;

        let requests_total = IntCounterVec::new(
            opts!("requests_total", "Orchestrated requests by operation and outcome"),
            &["operation", "outcome"],
        )?;
        let submit_retries_total = IntCounter::with_opts(opts!(
            "submit_retries_total",
            "Chain submissions retried after a pre-broadcast network failure"
        ))?;
        let ledger_writes_total =
            IntCounter::with_opts(opts!("ledger_writes_total", "Ledger entries persisted"))?;
        let double_allocations_total = IntCounter::with_opts(opts!(
            "double_allocations_total",
            "Accepted claims superseded by a concurrent claim for the same address"
        ))?;
        let chain_submit_seconds = Histogram::with_opts(histogram_opts!(
            "chain_submit_seconds",
            "Time spent signing and submitting one transaction",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(submit_retries_total.clone()))?;
        registry.register(Box::new(ledger_writes_total.clone()))?;
        registry.register(Box::new(double_allocations_total.clone()))?;
        registry.register(Box::new(chain_submit_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            submit_retries_total,
            ledger_writes_total,
            double_allocations_total,
            chain_submit_seconds,
        })
    }

    pub fn record_request(&self, operation: &str, outcome: &str) {
        self.requests_total.with_label_values(&[operation, outcome]).inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
