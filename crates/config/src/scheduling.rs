use serde::{Deserialize, Serialize};

/// Configuration for the head monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Delay before reopening a failed head stream, in ms.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// How many consecutive failed stream connections we tolerate.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Most ancestors checked or fetched for a single head event.
    #[serde(default = "default_backfill_lookback")]
    pub backfill_lookback: u64,

    /// Concurrent header fetches when first filling the window.
    #[serde(default = "default_concurrency")]
    pub prefill_concurrency: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            retry_attempts: default_retry_attempts(),
            backfill_lookback: default_backfill_lookback(),
            prefill_concurrency: default_concurrency(),
        }
    }
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    1_000
}

fn default_backfill_lookback() -> u64 {
    240
}

fn default_concurrency() -> usize {
    20
}

/// Which protocol constant sizes a scheduling window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WindowSource {
    /// `max_operations_time_to_live`
    #[default]
    Ttl,
    /// `blocks_per_cycle`
    Cycle,
}

/// A level where the window size changed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Breakpoint {
    pub level: u64,
    pub size_before: u64,
    pub size_after: u64,
}

/// Configuration for the baking rights cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RightsConfig {
    /// Highest round fetched for each level.
    #[serde(default)]
    pub max_round: u32,

    /// In-flight requests for rights and registry lookups.
    #[serde(default = "default_concurrency")]
    pub fetch_concurrency: usize,

    /// How many windows ahead of the current one are kept populated.
    #[serde(default = "default_window_lead")]
    pub window_lead: u64,

    #[serde(default)]
    pub window_source: WindowSource,

    /// Historical window size changes, in ascending level order.
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

impl Default for RightsConfig {
    fn default() -> Self {
        Self {
            max_round: 0,
            fetch_concurrency: default_concurrency(),
            window_lead: default_window_lead(),
            window_source: WindowSource::default(),
            breakpoints: Vec::new(),
        }
    }
}

fn default_window_lead() -> u64 {
    2
}
