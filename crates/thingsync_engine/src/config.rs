//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the whole engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry configuration for the sync queue.
    pub retry: RetryConfig,
    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,
    /// Simulated radio latency of the device transport.
    pub transport_latency: Duration,
    /// Battery level (percent) a simulated device starts with.
    pub initial_battery: u8,
    /// Percentage points lost per battery drain tick.
    pub battery_drain_step: u8,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            reconcile_interval: Duration::from_secs(30),
            transport_latency: Duration::from_millis(1000),
            initial_battery: 100,
            battery_drain_step: 1,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the reconciliation interval.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Sets the simulated transport latency.
    pub fn with_transport_latency(mut self, latency: Duration) -> Self {
        self.transport_latency = latency;
        self
    }

    /// Sets the initial battery level, clamped to 100.
    pub fn with_initial_battery(mut self, level: u8) -> Self {
        self.initial_battery = level.min(100);
        self
    }

    /// Sets the battery drain step.
    pub fn with_battery_drain_step(mut self, step: u8) -> Self {
        self.battery_drain_step = step;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Extra time added to the wake-up timer so the item is due when it fires.
    pub wake_buffer: Duration,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            wake_buffer: Duration::from_millis(100),
            add_jitter: false,
        }
    }

    /// Creates a configuration that drops an item after its first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            wake_buffer: Duration::ZERO,
            add_jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the wake-up buffer.
    pub fn with_wake_buffer(mut self, buffer: Duration) -> Self {
        self.wake_buffer = buffer;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let millis = if self.add_jitter {
            // Up to 25% extra
            millis + millis * 0.25 * rand_jitter()
        } else {
            millis
        };

        Duration::from_millis(millis.round().min(u64::MAX as f64) as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Cheap pseudo-random fraction in `[0, 1)` taken from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new()
            .with_reconcile_interval(Duration::from_secs(5))
            .with_transport_latency(Duration::from_millis(10))
            .with_initial_battery(150)
            .with_battery_drain_step(5);

        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.transport_latency, Duration::from_millis(10));
        assert_eq!(config.initial_battery, 100);
        assert_eq!(config.battery_drain_step, 5);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn default_backoff_sequence() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_retry(0), Duration::ZERO);
        let delays: Vec<u128> = (1..=5).map(|n| config.delay_for_retry(n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 32000]);
        assert_eq!(config.wake_buffer, Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = RetryConfig::default().with_jitter(true);

        for retry in 1..=5 {
            let plain = RetryConfig::default().delay_for_retry(retry);
            let jittered = config.delay_for_retry(retry);
            assert!(jittered >= plain);
            assert!(jittered <= plain + plain / 4);
        }
    }

    #[test]
    fn custom_backoff() {
        let config = RetryConfig::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_multiplier(3.0);

        assert_eq!(config.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(300));
        assert_eq!(config.delay_for_retry(3), Duration::from_millis(900));
    }

    #[test]
    fn no_retry_config() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
    }
}
