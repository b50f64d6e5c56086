//! Prometheus counters for the bundle lifecycle.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

/// Relay metrics, held in their own registry so several relays (or tests)
/// can live in one process.
#[derive(Clone, Debug)]
pub struct RelayMetrics {
    registry: Registry,
    /// Bundles accepted by injection.
    pub received: IntCounter,
    /// Bundles seen included on chain.
    pub successful: IntCounter,
    /// Bundles dropped when their deadline fired.
    pub dropped: IntCounter,
    /// Bundles whose branch left the live window.
    pub expired: IntCounter,
    /// Transmissions of a bundle that had been sent before.
    pub resends: IntCounter,
    pub transmit_failures: IntCounter,
    pub pending: IntGauge,
    /// Distinct bakers that included a relayed bundle.
    pub successful_bakers: IntGauge,
    /// Seconds until the block of the next targeted baker.
    pub block_wait_seconds: Gauge,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let received = IntCounter::new(
            "flashbake_received_bundles_total",
            "Bundles accepted for relay",
        )?;
        let successful = IntCounter::new(
            "flashbake_successful_bundles_total",
            "Bundles included on chain",
        )?;
        let dropped = IntCounter::new(
            "flashbake_dropped_bundles_total",
            "Bundles dropped after their deadline",
        )?;
        let expired = IntCounter::new(
            "flashbake_expired_bundles_total",
            "Bundles whose branch left the live window",
        )?;
        let resends = IntCounter::new(
            "flashbake_bundle_resends_total",
            "Transmissions of already sent bundles",
        )?;
        let transmit_failures = IntCounter::new(
            "flashbake_transmit_failures_total",
            "Transmissions a baker endpoint refused or never answered",
        )?;
        let pending = IntGauge::new("flashbake_pending_bundles", "Bundles awaiting inclusion")?;
        let successful_bakers = IntGauge::new(
            "flashbake_successful_bakers",
            "Distinct bakers that included a relayed bundle",
        )?;
        let block_wait_seconds = Gauge::new(
            "flashbake_block_wait_seconds",
            "Seconds until the next targeted baker's block",
        )?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(successful.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(expired.clone()))?;
        registry.register(Box::new(resends.clone()))?;
        registry.register(Box::new(transmit_failures.clone()))?;
        registry.register(Box::new(pending.clone()))?;
        registry.register(Box::new(successful_bakers.clone()))?;
        registry.register(Box::new(block_wait_seconds.clone()))?;

        Ok(Self {
            registry,
            received,
            successful,
            dropped,
            expired,
            resends,
            transmit_failures,
            pending,
            successful_bakers,
            block_wait_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
