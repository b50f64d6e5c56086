use super::Backoff;

/// Retries at a constant delay.
#[derive(Copy, Clone, Debug)]
pub struct FixedInterval {
    delay_ms: u64,
}

impl FixedInterval {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Backoff for FixedInterval {
    fn base_delay_ms(&self) -> u64 {
        self.delay_ms
    }

    fn next_delay_ms(&self, _curr_delay_ms: u64) -> u64 {
        self.delay_ms
    }
}
