//! Runtime configuration the discovery loop consumes, converted from the
//! raw `BalancerConfig` at the composition root (mirrors
//! `pb-08-balancer`'s `BalancerRuntimeConfig` split).

use std::time::Duration;

use pb_shared_types::BalancerConfig;

/// Hosts are probed on the firmware web port; neither driver exposes a
/// configurable port today (section 4.7 step 2).
pub const SCAN_PORT: u16 = 80;

#[derive(Debug, Clone)]
pub struct DiscoveryRuntimeConfig {
    pub cidrs: Vec<String>,
    pub scan_concurrency: usize,
    pub scan_timeout: Duration,
    pub discovery_interval: Duration,
}

impl From<&BalancerConfig> for DiscoveryRuntimeConfig {
    fn from(cfg: &BalancerConfig) -> Self {
        Self {
            cidrs: cfg.cidrs.clone(),
            scan_concurrency: cfg.scan_concurrency,
            scan_timeout: cfg.scan_timeout,
            discovery_interval: cfg.discovery_interval,
        }
    }
}
