//! The discovery loop: one independent pass per section 4.7.
//!
//! Grounded on the reference workspace's `qc-01-peer-discovery` service,
//! which likewise wraps a store/table behind a single service struct and
//! drives it from an externally-owned tick loop rather than owning its
//! own timer thread.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use pb_01_store::BalanceStore;
use pb_shared_types::{
    DiscoveredPreset, DiscoveryError, FirmwareFamily, MinerDriver, MinerInfo, MinerSpec,
    PresetSpec,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{DiscoveryRuntimeConfig, SCAN_PORT};
use crate::scanner::{enumerate_hosts, scan_responsive};

/// One probed host's matched driver, per section 4.7 step 3.
struct Matched {
    ip: IpAddr,
    family: FirmwareFamily,
    info: MinerInfo,
    driver: Arc<dyn MinerDriver>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoverySummary {
    pub hosts_scanned: usize,
    pub hosts_responsive: usize,
    pub miners_upserted: usize,
}

pub struct DiscoveryService {
    store: Arc<dyn BalanceStore>,
    /// Tried in order per host (section 9/10.6: ordered fallback, VNish before Stock).
    drivers: Vec<Arc<dyn MinerDriver>>,
    config: DiscoveryRuntimeConfig,
}

impl DiscoveryService {
    pub fn new(
        store: Arc<dyn BalanceStore>,
        drivers: Vec<Arc<dyn MinerDriver>>,
        config: DiscoveryRuntimeConfig,
    ) -> Self {
        Self {
            store,
            drivers,
            config,
        }
    }

    /// Runs the interval sleep/scan cycle until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let span = info_span!("discovery_pass");
            match self.run_once(&cancel).instrument(span).await {
                Ok(summary) => info!(
                    hosts_scanned = summary.hosts_scanned,
                    hosts_responsive = summary.hosts_responsive,
                    miners_upserted = summary.miners_upserted,
                    "discovery pass complete"
                ),
                Err(e) => warn!(error = %e, "discovery pass aborted"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.discovery_interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One full pass: steps 1-4 of section 4.7.
    pub async fn run_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DiscoverySummary, DiscoveryError> {
        if self.drivers.is_empty() {
            return Err(DiscoveryError::NoDriversConfigured);
        }

        let started = Instant::now();
        self.store.mark_all_miners_offline(cancel).await?;

        let hosts = enumerate_hosts(&self.config.cidrs)?;
        let hosts_scanned = hosts.len();
        let responsive = scan_responsive(
            hosts,
            SCAN_PORT,
            self.config.scan_concurrency,
            self.config.scan_timeout,
            cancel,
        )
        .await;

        let mut miners_upserted = 0;
        for ip in &responsive {
            if cancel.is_cancelled() {
                break;
            }
            let Some(matched) = self.probe_host(*ip).await else {
                continue;
            };
            if matched.family.is_balanceable() {
                match self.upsert_balanceable(cancel, &matched).await {
                    Ok(()) => miners_upserted += 1,
                    Err(e) => warn!(ip = %ip, error = %e, "failed to upsert discovered miner"),
                }
            } else {
                debug!(ip = %ip, family = ?matched.family, "non-balanceable host, skipping catalog");
            }
        }

        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "pass timing");

        Ok(DiscoverySummary {
            hosts_scanned,
            hosts_responsive: responsive.len(),
            miners_upserted,
        })
    }

    /// Tries each configured driver in order; the first that recognizes the
    /// host's firmware wins (section 9/10.6).
    async fn probe_host(&self, ip: IpAddr) -> Option<Matched> {
        for driver in &self.drivers {
            match driver.probe(ip).await {
                Ok(info) => {
                    return Some(Matched {
                        ip,
                        family: driver.family(),
                        info,
                        driver: driver.clone(),
                    })
                }
                Err(pb_shared_types::DriverError::NotThisFirmware) => continue,
                Err(e) => {
                    debug!(%ip, family = ?driver.family(), error = %e, "driver probe failed");
                    continue;
                }
            }
        }
        None
    }

    async fn upsert_balanceable(
        &self,
        cancel: &CancellationToken,
        matched: &Matched,
    ) -> Result<(), DiscoveryError> {
        let model = self
            .store
            .get_or_create_model(cancel, &matched.info.model_name)
            .await?;

        let existing_presets = self.store.get_presets_for_model(cancel, model.id).await?;
        if existing_presets.is_empty() {
            let discovered = matched
                .driver
                .list_presets(matched.ip)
                .await
                .map_err(|e| {
                    DiscoveryError::Store(pb_shared_types::StoreError::Decode(e.to_string()))
                })?;
            for (sort_order, preset) in discovered.into_iter().enumerate() {
                let DiscoveredPreset {
                    name,
                    label,
                    watts,
                    hashrate_th,
                    requires_modded_psu,
                } = preset;
                self.store
                    .upsert_model_preset(
                        cancel,
                        PresetSpec {
                            model_id: model.id,
                            name,
                            label,
                            watts,
                            hashrate_th,
                            requires_modded_psu,
                            sort_order: sort_order as i32,
                        },
                    )
                    .await?;
            }
        }

        let current_name = matched.driver.current_preset(matched.ip).await.ok();
        let current_preset_id = match current_name {
            Some(name) => {
                let presets = self.store.get_presets_for_model(cancel, model.id).await?;
                presets.into_iter().find(|p| p.name == name).map(|p| p.id)
            }
            None => None,
        };

        self.store
            .upsert_miner(
                cancel,
                MinerSpec {
                    mac: matched.info.mac.clone(),
                    ip: matched.ip,
                    firmware_family: matched.family,
                    model_id: Some(model.id),
                    current_preset_id,
                },
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pb_01_store::{SledEngine, Store, SystemClock};
    use pb_shared_types::{BalanceConfig, DriverError, MacAddress};
    use std::net::Ipv4Addr;
    use std::str::FromStr as _;

    struct FakeDriver {
        family: FirmwareFamily,
        recognizes: bool,
        presets: Vec<DiscoveredPreset>,
        current: &'static str,
    }

    #[async_trait]
    impl MinerDriver for FakeDriver {
        fn family(&self) -> FirmwareFamily {
            self.family
        }

        async fn probe(&self, _ip: IpAddr) -> Result<MinerInfo, DriverError> {
            if self.recognizes {
                Ok(MinerInfo {
                    model_name: "Antminer S19".into(),
                    mac: MacAddress::normalize("AA:BB:CC:DD:EE:01"),
                    firmware_version: "1.0.0".into(),
                })
            } else {
                Err(DriverError::NotThisFirmware)
            }
        }

        async fn list_presets(&self, _ip: IpAddr) -> Result<Vec<DiscoveredPreset>, DriverError> {
            Ok(self.presets.clone())
        }

        async fn current_preset(&self, _ip: IpAddr) -> Result<String, DriverError> {
            Ok(self.current.to_string())
        }

        async fn set_preset(&self, _ip: IpAddr, _preset_name: &str) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn test_store() -> Arc<dyn BalanceStore> {
        let engine = Arc::new(SledEngine::temporary().expect("temp sled engine"));
        Arc::new(Store::new(engine, Arc::new(SystemClock)))
    }

    fn no_cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn probe_host_falls_back_in_configured_order() {
        let stock = Arc::new(FakeDriver {
            family: FirmwareFamily::Stock,
            recognizes: false,
            presets: Vec::new(),
            current: "",
        });
        let vnish = Arc::new(FakeDriver {
            family: FirmwareFamily::VNish,
            recognizes: true,
            presets: Vec::new(),
            current: "",
        });
        let service = DiscoveryService::new(
            test_store(),
            vec![stock, vnish],
            DiscoveryRuntimeConfig {
                cidrs: vec!["10.0.0.0/30".into()],
                scan_concurrency: 4,
                scan_timeout: std::time::Duration::from_millis(50),
                discovery_interval: std::time::Duration::from_secs(60),
            },
        );

        let ip = IpAddr::V4(Ipv4Addr::from_str("10.0.0.1").unwrap());
        let matched = service.probe_host(ip).await.expect("vnish should match");
        assert_eq!(matched.family, FirmwareFamily::VNish);
    }

    #[tokio::test]
    async fn upsert_balanceable_populates_presets_and_resolves_current() {
        let store = test_store();
        let driver: Arc<dyn MinerDriver> = Arc::new(FakeDriver {
            family: FirmwareFamily::VNish,
            recognizes: true,
            presets: vec![
                DiscoveredPreset {
                    name: "low".into(),
                    label: "690 watt ~ 68.0 TH".into(),
                    watts: 690,
                    hashrate_th: 68.0,
                    requires_modded_psu: false,
                },
                DiscoveredPreset {
                    name: "high".into(),
                    label: "990 watt ~ 95.0 TH".into(),
                    watts: 990,
                    hashrate_th: 95.0,
                    requires_modded_psu: false,
                },
            ],
            current: "high",
        });
        let service = DiscoveryService::new(
            store.clone(),
            vec![driver.clone()],
            DiscoveryRuntimeConfig {
                cidrs: Vec::new(),
                scan_concurrency: 4,
                scan_timeout: std::time::Duration::from_millis(50),
                discovery_interval: std::time::Duration::from_secs(60),
            },
        );
        let cancel = no_cancel();
        let ip = IpAddr::V4(Ipv4Addr::from_str("10.0.0.2").unwrap());
        let matched = service.probe_host(ip).await.expect("driver should match");

        service
            .upsert_balanceable(&cancel, &matched)
            .await
            .expect("upsert should succeed");

        let manageable_model = store
            .get_or_create_model(&cancel, "Antminer S19")
            .await
            .unwrap();
        let presets = store
            .get_presets_for_model(&cancel, manageable_model.id)
            .await
            .unwrap();
        assert_eq!(presets.len(), 2);

        let low = presets.iter().find(|p| p.name == "low").unwrap();
        let high = presets.iter().find(|p| p.name == "high").unwrap();
        store
            .set_model_limits(&cancel, manageable_model.id, low.id, high.id)
            .await
            .unwrap();
        let miner_id = store
            .upsert_miner(
                &cancel,
                pb_shared_types::MinerSpec {
                    mac: MacAddress::normalize("AA:BB:CC:DD:EE:01"),
                    ip,
                    firmware_family: FirmwareFamily::VNish,
                    model_id: Some(manageable_model.id),
                    current_preset_id: Some(high.id),
                },
            )
            .await
            .unwrap();
        store
            .set_balance_config(
                &cancel,
                BalanceConfig {
                    miner_id,
                    enabled: true,
                    priority: 50,
                    locked: false,
                },
            )
            .await
            .unwrap();

        let manageable = store.get_manageable_miners(&cancel).await.unwrap();
        let ctx = manageable
            .iter()
            .find(|m| m.miner.mac == MacAddress::normalize("AA:BB:CC:DD:EE:01"))
            .expect("miner should be manageable");
        // The miner's reported current preset ("high") resolved to the matching id.
        assert_eq!(ctx.current.id, high.id);
    }
}
