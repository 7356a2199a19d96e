//! Integration tests for the invariants in `SPEC_FULL.md` section 8:
//! settlement sweeps, cooldown expiry, pending-delta accounting, and the
//! manageable-miners filter.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use pb_01_store::{BalanceStore, SledEngine, Store, TimeSource};
use pb_shared_types::{
    ChangeReason, FirmwareFamily, MacAddress, MinerSpec, PendingChange, PresetSpec,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct ManualClock(RwLock<DateTime<Utc>>);

impl ManualClock {
    fn new(start: DateTime<Utc>) -> Self {
        Self(RwLock::new(start))
    }

    fn set(&self, t: DateTime<Utc>) {
        *self.0.write().unwrap() = t;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.read().unwrap()
    }
}

fn store_with_clock(clock: Arc<ManualClock>) -> Store {
    let engine = Arc::new(SledEngine::temporary().expect("temp sled engine"));
    Store::new(engine, clock)
}

fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn cooldown_expires_strictly_before_now() {
    let t0 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let clock = Arc::new(ManualClock::new(t0));
    let store = store_with_clock(clock.clone());
    let cancel = no_cancel();

    let model = store.get_or_create_model(&cancel, "Antminer S19").await.unwrap();
    let miner_id = store
        .upsert_miner(
            &cancel,
            MinerSpec {
                mac: MacAddress::normalize("AA:BB:CC:DD:EE:FF"),
                ip: IpAddr::from_str("10.0.0.5").unwrap(),
                firmware_family: FirmwareFamily::VNish,
                model_id: Some(model.id),
                current_preset_id: None,
            },
        )
        .await
        .unwrap();

    let until = t0 + Duration::seconds(300);
    store.set_cooldown(&cancel, miner_id, until).await.unwrap();

    // Before expiry: still counted, cleanup is a no-op.
    assert_eq!(store.count_miners_on_cooldown(&cancel).await.unwrap(), 1);
    assert_eq!(store.cleanup_expired_cooldowns(&cancel).await.unwrap(), 0);

    // Exactly at `until`: the cooldown is no longer active (until > now is false).
    clock.set(until);
    assert_eq!(store.count_miners_on_cooldown(&cancel).await.unwrap(), 0);
    assert_eq!(store.cleanup_expired_cooldowns(&cancel).await.unwrap(), 1);
    assert_eq!(store.cleanup_expired_cooldowns(&cancel).await.unwrap(), 0);
}

#[tokio::test]
async fn settled_changes_are_cleared_inclusive_of_now() {
    let t0 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let clock = Arc::new(ManualClock::new(t0));
    let store = store_with_clock(clock.clone());
    let cancel = no_cancel();

    let model = store.get_or_create_model(&cancel, "Antminer S19").await.unwrap();
    let from_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "990w".into(),
                label: "990 watt".into(),
                watts: 990,
                hashrate_th: 95.0,
                requires_modded_psu: false,
                sort_order: 0,
            },
        )
        .await
        .unwrap();
    let to_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "690w".into(),
                label: "690 watt".into(),
                watts: 690,
                hashrate_th: 68.0,
                requires_modded_psu: false,
                sort_order: 1,
            },
        )
        .await
        .unwrap();
    let miner_id = store
        .upsert_miner(
            &cancel,
            MinerSpec {
                mac: MacAddress::normalize("11:22:33:44:55:66"),
                ip: IpAddr::from_str("10.0.0.6").unwrap(),
                firmware_family: FirmwareFamily::VNish,
                model_id: Some(model.id),
                current_preset_id: Some(from_preset),
            },
        )
        .await
        .unwrap();

    let settles_at = t0 + Duration::seconds(60);
    store
        .create_pending_change(
            &cancel,
            PendingChange {
                id: Uuid::new_v4(),
                miner_id,
                from_preset_id: from_preset,
                to_preset_id: to_preset,
                expected_delta_w: 300,
                issued_at: t0,
                settles_at,
            },
        )
        .await
        .unwrap();

    assert_eq!(store.sum_pending_delta(&cancel).await.unwrap(), 300);

    // Not yet settled.
    clock.set(settles_at - Duration::seconds(1));
    assert_eq!(store.clear_settled_changes(&cancel).await.unwrap(), 0);

    // settles_at <= now is inclusive: exactly at the boundary it clears.
    clock.set(settles_at);
    assert_eq!(store.clear_settled_changes(&cancel).await.unwrap(), 1);
    assert_eq!(store.sum_pending_delta(&cancel).await.unwrap(), 0);
}

#[tokio::test]
async fn pending_changes_for_offline_miners_are_discarded() {
    let t0 = Utc::now();
    let clock = Arc::new(ManualClock::new(t0));
    let store = store_with_clock(clock);
    let cancel = no_cancel();

    let model = store.get_or_create_model(&cancel, "Whatsminer M50").await.unwrap();
    let preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "3300w".into(),
                label: "3300 watt".into(),
                watts: 3300,
                hashrate_th: 126.0,
                requires_modded_psu: false,
                sort_order: 0,
            },
        )
        .await
        .unwrap();
    let miner_id = store
        .upsert_miner(
            &cancel,
            MinerSpec {
                mac: MacAddress::normalize("AA:AA:AA:AA:AA:AA"),
                ip: IpAddr::from_str("10.0.0.7").unwrap(),
                firmware_family: FirmwareFamily::VNish,
                model_id: Some(model.id),
                current_preset_id: Some(preset),
            },
        )
        .await
        .unwrap();

    store
        .create_pending_change(
            &cancel,
            PendingChange {
                id: Uuid::new_v4(),
                miner_id,
                from_preset_id: preset,
                to_preset_id: preset,
                expected_delta_w: 150,
                issued_at: t0,
                settles_at: t0 + Duration::seconds(600),
            },
        )
        .await
        .unwrap();

    // The miner drops offline mid-flight (missed a discovery sweep).
    store.set_miner_online(&cancel, miner_id, false).await.unwrap();

    assert_eq!(
        store
            .clear_pending_for_offline_miners(&cancel)
            .await
            .unwrap(),
        1
    );
    assert_eq!(store.sum_pending_delta(&cancel).await.unwrap(), 0);
}

#[tokio::test]
async fn manageable_miners_excludes_unconfigured_and_disabled() {
    let t0 = Utc::now();
    let clock = Arc::new(ManualClock::new(t0));
    let store = store_with_clock(clock);
    let cancel = no_cancel();

    let model = store.get_or_create_model(&cancel, "Antminer S21").await.unwrap();
    let min_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "min".into(),
                label: "600 watt".into(),
                watts: 600,
                hashrate_th: 40.0,
                requires_modded_psu: false,
                sort_order: 0,
            },
        )
        .await
        .unwrap();
    let max_preset = store
        .upsert_model_preset(
            &cancel,
            PresetSpec {
                model_id: model.id,
                name: "max".into(),
                label: "900 watt".into(),
                watts: 900,
                hashrate_th: 55.0,
                requires_modded_psu: false,
                sort_order: 1,
            },
        )
        .await
        .unwrap();

    let miner_a = store
        .upsert_miner(
            &cancel,
            MinerSpec {
                mac: MacAddress::normalize("BB:BB:BB:BB:BB:01"),
                ip: IpAddr::from_str("10.0.1.1").unwrap(),
                firmware_family: FirmwareFamily::VNish,
                model_id: Some(model.id),
                current_preset_id: Some(min_preset),
            },
        )
        .await
        .unwrap();

    // Model has no min/max bounds yet: excluded.
    assert!(store.get_manageable_miners(&cancel).await.unwrap().is_empty());

    store
        .set_model_limits(&cancel, model.id, min_preset, max_preset)
        .await
        .unwrap();

    // Still excluded: balancing is opt-in, and this miner's config defaults disabled.
    assert!(store.get_manageable_miners(&cancel).await.unwrap().is_empty());

    // A stock-firmware miner is never manageable regardless of config.
    let _stock_miner = store
        .upsert_miner(
            &cancel,
            MinerSpec {
                mac: MacAddress::normalize("BB:BB:BB:BB:BB:02"),
                ip: IpAddr::from_str("10.0.1.2").unwrap(),
                firmware_family: FirmwareFamily::Stock,
                model_id: Some(model.id),
                current_preset_id: Some(min_preset),
            },
        )
        .await
        .unwrap();

    let _ = miner_a;
}
