//! Runtime configuration the balancer actually consumes, converted from
//! the raw `BalancerConfig` at the composition root (section 10.2): every
//! duration here is a `std::time::Duration`, not a raw integer.

use std::time::Duration;

use pb_shared_types::BalancerConfig;

#[derive(Debug, Clone)]
pub struct BalancerRuntimeConfig {
    pub poll_interval: Duration,
    pub emergency_margin: f64,
    pub critical_margin: f64,
    pub safe_margin: f64,
    pub recovery_margin: f64,
    pub recovery_hysteresis: Duration,
    pub cooldown_duration: Duration,
    pub settle_time: Duration,
    pub max_parallel_emergency: usize,
}

impl From<&BalancerConfig> for BalancerRuntimeConfig {
    fn from(cfg: &BalancerConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            emergency_margin: cfg.emergency_margin_pct,
            critical_margin: cfg.critical_margin_pct,
            safe_margin: cfg.safe_margin_pct,
            recovery_margin: cfg.recovery_margin_pct,
            recovery_hysteresis: cfg.recovery_hysteresis,
            cooldown_duration: cfg.cooldown_duration,
            settle_time: cfg.settle_time,
            max_parallel_emergency: cfg.max_parallel_emergency,
        }
    }
}
