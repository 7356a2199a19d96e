//! Integration tests for the five-state control machine (section 4.6).
//!
//! Exercises a real [`Store`] over a temporary `sled` engine, a
//! [`FakeReadingSource`] serving canned readings, and an in-test driver
//! that always accepts `SetPreset`.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pb_01_store::{BalanceStore, SledEngine, Store, SystemClock};
use pb_03_reading_source::FakeReadingSource;
use pb_08_balancer::{Balancer, BalancerRuntimeConfig};
use pb_shared_types::{
    BalanceConfig, ControlState, DriverError, EnergyReading, FirmwareFamily, MacAddress,
    MinerDriver, MinerInfo, MinerSpec, PresetSpec,
};
use tokio_util::sync::CancellationToken;

struct AlwaysAcceptDriver {
    family: FirmwareFamily,
    calls: AtomicUsize,
}

impl AlwaysAcceptDriver {
    fn new() -> Self {
        Self {
            family: FirmwareFamily::VNish,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MinerDriver for AlwaysAcceptDriver {
    fn family(&self) -> FirmwareFamily {
        self.family
    }

    async fn probe(&self, _ip: IpAddr) -> Result<MinerInfo, DriverError> {
        Err(DriverError::NotThisFirmware)
    }

    async fn list_presets(
        &self,
        _ip: IpAddr,
    ) -> Result<Vec<pb_shared_types::DiscoveredPreset>, DriverError> {
        Ok(Vec::new())
    }

    async fn current_preset(&self, _ip: IpAddr) -> Result<String, DriverError> {
        Ok("unused".into())
    }

    async fn set_preset(&self, _ip: IpAddr, _preset_name: &str) -> Result<(), DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

fn test_config() -> BalancerRuntimeConfig {
    BalancerRuntimeConfig {
        poll_interval: Duration::from_secs(10),
        emergency_margin: -10.0,
        critical_margin: 5.0,
        safe_margin: 15.0,
        recovery_margin: 25.0,
        recovery_hysteresis: Duration::from_secs(300),
        cooldown_duration: Duration::from_secs(600),
        settle_time: Duration::from_secs(120),
        max_parallel_emergency: 4,
    }
}

async fn seeded_store() -> (Store, Vec<pb_shared_types::MinerId>) {
    let engine = Arc::new(SledEngine::temporary().expect("temp sled engine"));
    let store = Store::new(engine, Arc::new(SystemClock));
    let cancel = no_cancel();

    let model = store
        .get_or_create_model(&cancel, "Antminer S19")
        .await
        .unwrap();
    let min_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "690w".into(),
                label: "690 watt".into(),
                watts: 690,
                hashrate_th: 68.0,
                requires_modded_psu: false,
                sort_order: 0,
            },
        )
        .await
        .unwrap();
    let mid_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "860w".into(),
                label: "860 watt".into(),
                watts: 860,
                hashrate_th: 84.0,
                requires_modded_psu: false,
                sort_order: 1,
            },
        )
        .await
        .unwrap();
    let max_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "990w".into(),
                label: "990 watt".into(),
                watts: 990,
                hashrate_th: 95.0,
                requires_modded_psu: false,
                sort_order: 2,
            },
        )
        .await
        .unwrap();
    store
        .set_model_limits(&cancel, model.id, min_preset, max_preset)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..3u8 {
        let mac = MacAddress::normalize(&format!("AA:BB:CC:DD:EE:{:02X}", i));
        let ip = IpAddr::from_str(&format!("10.0.0.{}", 10 + i)).unwrap();
        let miner_id = store
            .upsert_miner(
                &cancel,
                MinerSpec {
                    mac,
                    ip,
                    firmware_family: FirmwareFamily::VNish,
                    model_id: Some(model.id),
                    current_preset_id: Some(mid_preset),
                },
            )
            .await
            .unwrap();
        store.set_miner_online(&cancel, miner_id, true).await.unwrap();
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
        ids.push(miner_id);
    }

    let _ = min_preset;
    (store, ids)
}

fn reading(generation_mw: f64, consumption_mw: f64) -> EnergyReading {
    EnergyReading::new(Utc::now(), generation_mw, consumption_mw, Vec::new())
}

#[tokio::test]
async fn steady_state_margin_stays_idle_and_issues_no_changes() {
    let (store, _ids) = seeded_store().await;
    let store: Arc<dyn BalanceStore> = Arc::new(store);
    let driver = Arc::new(AlwaysAcceptDriver::new());
    // Comfortably inside [critical_margin, safe_margin): neither reduce nor recover.
    let source = Arc::new(FakeReadingSource::single(reading(3.0, 2.7)));
    let mut balancer = Balancer::new(
        store.clone(),
        source,
        driver.clone(),
        test_config(),
    );

    let cancel = no_cancel();
    balancer.tick(&cancel).await;
    balancer.tick(&cancel).await;

    assert_eq!(balancer.status().await.state, ControlState::Idle);
    assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn low_margin_enters_reducing_and_issues_a_change() {
    let (store, _ids) = seeded_store().await;
    let store: Arc<dyn BalanceStore> = Arc::new(store);
    let driver = Arc::new(AlwaysAcceptDriver::new());
    // margin_percent = (3.0 - 2.98) / 3.0 * 100 ~= 0.67%, well under critical_margin.
    let source = Arc::new(FakeReadingSource::single(reading(3.0, 2.98)));
    let mut balancer = Balancer::new(store.clone(), source, driver.clone(), test_config());

    let cancel = no_cancel();
    // First tick: Idle -> Reducing (the transition itself issues no change).
    balancer.tick(&cancel).await;
    assert_eq!(balancer.status().await.state, ControlState::Reducing);
    assert_eq!(driver.calls.load(Ordering::SeqCst), 0);

    // Second tick: now in Reducing, the handler proposes and applies a change.
    balancer.tick(&cancel).await;
    assert_eq!(balancer.status().await.state, ControlState::Reducing);
    assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    assert!(store.sum_pending_delta(&cancel).await.unwrap() > 0);
}

#[tokio::test]
async fn emergency_margin_fans_out_bounded_by_max_parallel() {
    let (store, ids) = seeded_store().await;
    assert_eq!(ids.len(), 3);
    let store: Arc<dyn BalanceStore> = Arc::new(store);
    let driver = Arc::new(AlwaysAcceptDriver::new());
    // Deeply negative margin: forces Emergency on the very first tick.
    let source = Arc::new(FakeReadingSource::single(reading(3.0, 4.0)));
    let mut config = test_config();
    config.max_parallel_emergency = 2;
    let mut balancer = Balancer::new(store, source, driver.clone(), config);

    let cancel = no_cancel();
    // Idle -> Reducing -> Emergency, each edge taking one tick; the fan-out
    // itself only fires once the state machine is already in Emergency.
    balancer.tick(&cancel).await;
    balancer.tick(&cancel).await;
    assert_eq!(balancer.status().await.state, ControlState::Emergency);
    assert_eq!(driver.calls.load(Ordering::SeqCst), 0);

    balancer.tick(&cancel).await;
    assert_eq!(balancer.status().await.state, ControlState::Emergency);
    // Only 3 manageable miners exist and the cap is 2: at most 2 fire per tick.
    assert!(driver.calls.load(Ordering::SeqCst) <= 2);
    assert!(driver.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn hysteresis_delays_idle_to_increasing_until_sustained() {
    let (store, _ids) = seeded_store().await;
    let store: Arc<dyn BalanceStore> = Arc::new(store);
    let driver = Arc::new(AlwaysAcceptDriver::new());
    // margin_percent = (3.0 - 2.0) / 3.0 * 100 ~= 33%, above recovery_margin.
    let source = Arc::new(FakeReadingSource::single(reading(3.0, 2.0)));
    let mut config = test_config();
    config.recovery_hysteresis = Duration::from_secs(3600);
    let mut balancer = Balancer::new(store, source, driver, config);

    let cancel = no_cancel();
    balancer.tick(&cancel).await;

    // The hysteresis window has not elapsed yet: still Idle.
    assert_eq!(balancer.status().await.state, ControlState::Idle);
}
