//! Runtime configuration, per `SPEC_FULL.md` section 6.4. Loaded and layered
//! by the `balancer-node` composition root (defaults -> TOML file -> env ->
//! CLI flags); this crate only owns the typed, validated shape and the
//! invariant check every layer must eventually satisfy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Typed, validated configuration for the whole balancer node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub poll_interval: Duration,
    pub discovery_interval: Duration,

    pub emergency_margin_pct: f64,
    pub critical_margin_pct: f64,
    pub safe_margin_pct: f64,
    pub recovery_margin_pct: f64,
    pub recovery_hysteresis: Duration,

    /// Reserved minimum between serial changes; today enforced by
    /// `poll_interval` + cooldown, per section 6.4.
    pub change_spacing: Duration,
    pub cooldown_duration: Duration,
    pub settle_time: Duration,
    pub max_parallel_emergency: usize,

    /// CIDR ranges to scan, e.g. `"10.0.4.0/24"`. Parsed by the discovery
    /// crate, which owns the `ipnet` dependency.
    pub cidrs: Vec<String>,
    pub scan_concurrency: usize,
    pub scan_timeout: Duration,

    /// Lower bound the operator is attesting for meter lag; validated
    /// against `settle_time`.
    pub expected_meter_lag: Duration,

    /// Aggregator endpoint polled by `HttpReadingSource` (section 6.1).
    pub reading_source_url: String,
    /// Shared unlock password for every VNish host (section 6.2).
    pub vnish_password: String,
    /// Digest-auth credentials for stock Bitmain CGI hosts (section 6.2).
    pub stock_username: String,
    pub stock_password: String,
    /// Shared timeout for every driver/reading-source HTTP call.
    pub driver_timeout: Duration,
    /// Filesystem path for the embedded `sled` store.
    pub store_path: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            discovery_interval: Duration::from_secs(5 * 60),
            emergency_margin_pct: 5.0,
            critical_margin_pct: 10.0,
            safe_margin_pct: 15.0,
            recovery_margin_pct: 20.0,
            recovery_hysteresis: Duration::from_secs(2 * 60),
            change_spacing: Duration::from_secs(10),
            cooldown_duration: Duration::from_secs(10 * 60),
            settle_time: Duration::from_secs(5 * 60),
            max_parallel_emergency: 5,
            cidrs: Vec::new(),
            scan_concurrency: 50,
            scan_timeout: Duration::from_secs(3),
            expected_meter_lag: Duration::from_secs(0),
            reading_source_url: "http://localhost:9100/snapshot".to_string(),
            vnish_password: String::new(),
            stock_username: "root".to_string(),
            stock_password: String::new(),
            driver_timeout: Duration::from_secs(5),
            store_path: "./data/balancer-store".to_string(),
        }
    }
}

impl BalancerConfig {
    /// Validates the invariants from section 6.4 and section 8 item 6.
    /// Fatal at startup if violated; never silently corrected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.emergency_margin_pct < self.critical_margin_pct
            && self.critical_margin_pct < self.safe_margin_pct
            && self.safe_margin_pct < self.recovery_margin_pct)
        {
            return Err(ConfigError::ThresholdsOutOfOrder {
                emergency: self.emergency_margin_pct,
                critical: self.critical_margin_pct,
                safe: self.safe_margin_pct,
                recovery: self.recovery_margin_pct,
            });
        }

        if self.settle_time < self.expected_meter_lag {
            return Err(ConfigError::SettleTimeTooShort {
                settle_time: self.settle_time,
                expected_meter_lag: self.expected_meter_lag,
            });
        }

        if self.cidrs.is_empty() {
            return Err(ConfigError::NoCidrsConfigured);
        }

        if self.max_parallel_emergency == 0 {
            return Err(ConfigError::ZeroParallelEmergency);
        }

        if self.vnish_password.is_empty() {
            return Err(ConfigError::MissingVNishCredentials);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_invalid_without_cidrs() {
        let cfg = BalancerConfig::default();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NoCidrsConfigured)
        ));
    }

    #[test]
    fn default_config_with_cidrs_is_valid() {
        let mut cfg = BalancerConfig::default();
        cfg.cidrs.push("10.0.0.0/24".to_string());
        cfg.vnish_password = "hunter2".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_missing_vnish_credentials() {
        let mut cfg = BalancerConfig::default();
        cfg.cidrs.push("10.0.0.0/24".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingVNishCredentials)
        ));
    }

    #[test]
    fn rejects_out_of_order_thresholds() {
        let mut cfg = BalancerConfig::default();
        cfg.cidrs.push("10.0.0.0/24".to_string());
        cfg.critical_margin_pct = 1.0; // now critical < emergency
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdsOutOfOrder { .. })
        ));
    }

    #[test]
    fn rejects_settle_time_shorter_than_meter_lag() {
        let mut cfg = BalancerConfig::default();
        cfg.cidrs.push("10.0.0.0/24".to_string());
        cfg.expected_meter_lag = Duration::from_secs(600);
        cfg.settle_time = Duration::from_secs(300);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::SettleTimeTooShort { .. })
        ));
    }
}
