use std::time::Duration;

/// Settings for a worker [`Pool`](crate::pool::Pool).
///
/// `lease_timeout` defaults to ten minutes rather than zero: with a zero
/// lease a claimed job is immediately re-claimable by any other poller, so
/// nothing protects a running handler from a concurrent duplicate. Zero is
/// still accepted for callers that want claims to never be recovered.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub poll_interval: Duration,
    pub lease_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            poll_interval: Duration::from_secs(1),
            lease_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl PoolConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }
}
