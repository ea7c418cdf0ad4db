//! Upstream engine configuration

use std::time::Duration;

/// Protocol timing configuration
///
/// Defaults follow the RFC 4601 constants; every period can be shortened
/// for tests.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Periodic Join refresh interval (t_periodic)
    pub join_period: Duration,

    /// Keepalive period: how long a flow stays "active" after traffic
    pub keepalive_period: Duration,

    /// Base register suppression period; the effective value is jittered
    /// into [0.5x, 1.5x] of this
    pub register_suppression_period: Duration,

    /// Register probe period: how long before suppression expiry a
    /// Null-Register probe goes out
    pub register_probe_period: Duration,

    /// How long a received register keeps the MSDP local-source cache warm
    pub msdp_reg_period: Duration,

    /// Full rotation time of the traffic sweep wheel: every (S,G) entry
    /// is revisited once per this period
    pub sweep_period: Duration,

    /// Number of buckets in the sweep wheel
    pub sweep_slots: usize,

    /// A flow with no packets for longer than this is considered idle by
    /// the traffic sweep
    pub traffic_idle_threshold: Duration,

    /// Granularity of the runtime driver's timer tick
    pub tick_interval: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            join_period: Duration::from_secs(60),
            keepalive_period: Duration::from_secs(210),
            register_suppression_period: Duration::from_secs(60),
            register_probe_period: Duration::from_secs(5),
            msdp_reg_period: Duration::from_secs(270),
            sweep_period: Duration::from_secs(31),
            sweep_slots: 100,
            traffic_idle_threshold: Duration::from_secs(30),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl UpstreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Join refresh period
    pub fn join_period(mut self, period: Duration) -> Self {
        self.join_period = period;
        self
    }

    /// Set the keepalive period
    pub fn keepalive_period(mut self, period: Duration) -> Self {
        self.keepalive_period = period;
        self
    }

    /// Set the base register suppression period
    pub fn register_suppression_period(mut self, period: Duration) -> Self {
        self.register_suppression_period = period;
        self
    }

    /// Set the register probe period
    pub fn register_probe_period(mut self, period: Duration) -> Self {
        self.register_probe_period = period;
        self
    }

    /// Set the traffic sweep rotation period and bucket count
    pub fn sweep(mut self, period: Duration, slots: usize) -> Self {
        self.sweep_period = period;
        self.sweep_slots = slots.max(1);
        self
    }

    /// Set the traffic idle threshold
    pub fn traffic_idle_threshold(mut self, threshold: Duration) -> Self {
        self.traffic_idle_threshold = threshold;
        self
    }

    /// Set the driver tick granularity
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_rfc_constants() {
        let config = UpstreamConfig::default();
        assert_eq!(config.join_period, Duration::from_secs(60));
        assert_eq!(config.keepalive_period, Duration::from_secs(210));
        assert_eq!(config.register_suppression_period, Duration::from_secs(60));
        assert_eq!(config.register_probe_period, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_style() {
        let config = UpstreamConfig::new()
            .join_period(Duration::from_millis(50))
            .sweep(Duration::from_millis(200), 0);
        assert_eq!(config.join_period, Duration::from_millis(50));
        // Slot count is clamped to at least one bucket
        assert_eq!(config.sweep_slots, 1);
    }
}
