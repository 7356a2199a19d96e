//! The store service: implements [`BalanceStore`] over any [`KvEngine`],
//! maintaining the secondary indices declared in `domain::keys` by hand.
//!
//! Grounded on the reference workspace's `qc-02-block-storage` service,
//! which keeps indices in lockstep with primary records inside the same
//! KV engine rather than delegating to a query planner.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pb_shared_types::{
    BalanceConfig, ChangeLog, Cooldown, EnergyReading, MinerId, MinerSpec, MinerWithContext,
    Model, ModelId, PendingChange, Preset, PresetId, PresetSpec, StoreError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::keys::{
    model_name_key, string_key, timestamp_id_key, timestamp_millis_be, uuid_key, KeyPrefix,
};
use crate::ports::inbound::{new_uuid, BalanceStore};
use crate::ports::outbound::{KvEngine, TimeSource};

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

fn check(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reads a `Uuid` stored verbatim (not bincode-framed) as a secondary-index value.
fn decode_uuid_value(bytes: &[u8]) -> Option<Uuid> {
    let arr: [u8; 16] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes(arr))
}

/// Splits a `<prefix><8-byte timestamp><16-byte uuid>` key, given the prefix length.
fn split_timestamp_id_key(key: &[u8], prefix_len: usize) -> Option<(DateTime<Utc>, Uuid)> {
    if key.len() < prefix_len + 24 {
        return None;
    }
    let ts_bytes: [u8; 8] = key[prefix_len..prefix_len + 8].try_into().ok()?;
    let id_bytes: [u8; 16] = key[prefix_len + 8..prefix_len + 24].try_into().ok()?;
    Some((
        crate::domain::keys::millis_be_to_timestamp(&ts_bytes),
        Uuid::from_bytes(id_bytes),
    ))
}

/// Implements the full store contract over an injected [`KvEngine`] and
/// [`TimeSource`]. Holds no state of its own beyond those two handles.
pub struct Store {
    engine: Arc<dyn KvEngine>,
    clock: Arc<dyn TimeSource>,
}

impl Store {
    pub fn new(engine: Arc<dyn KvEngine>, clock: Arc<dyn TimeSource>) -> Self {
        Self { engine, clock }
    }

    fn load_model(&self, id: Uuid) -> Result<Option<Model>, StoreError> {
        match self.engine.get(&uuid_key(&KeyPrefix::Model, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_preset(&self, id: Uuid) -> Result<Option<Preset>, StoreError> {
        match self.engine.get(&uuid_key(&KeyPrefix::Preset, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_miner(&self, id: Uuid) -> Result<Option<pb_shared_types::Miner>, StoreError> {
        match self.engine.get(&uuid_key(&KeyPrefix::Miner, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_miner(&self, miner: &pb_shared_types::Miner) -> Result<(), StoreError> {
        self.engine
            .insert(&uuid_key(&KeyPrefix::Miner, miner.id.0), &encode(miner)?)
    }

    fn load_config(&self, miner_id: Uuid) -> Result<Option<BalanceConfig>, StoreError> {
        match self
            .engine
            .get(&uuid_key(&KeyPrefix::BalanceConfig, miner_id))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_cooldown(&self, miner_id: Uuid) -> Result<Option<Cooldown>, StoreError> {
        match self.engine.get(&uuid_key(&KeyPrefix::Cooldown, miner_id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BalanceStore for Store {
    #[instrument(skip(self, cancel))]
    async fn upsert_model_preset(
        &self,
        cancel: &CancellationToken,
        spec: PresetSpec,
    ) -> Result<PresetId, StoreError> {
        check(cancel)?;
        let idx_key = model_name_key(&KeyPrefix::PresetByModelName, spec.model_id.0, &spec.name);
        let id = match self.engine.get(&idx_key)? {
            Some(bytes) => decode_uuid_value(&bytes).ok_or_else(|| {
                StoreError::Decode("preset index value was not a uuid".into())
            })?,
            None => new_uuid(),
        };
        let preset = Preset {
            id: PresetId(id),
            model_id: spec.model_id,
            name: spec.name,
            label: spec.label,
            watts: spec.watts,
            hashrate_th: spec.hashrate_th,
            requires_modded_psu: spec.requires_modded_psu,
            sort_order: spec.sort_order,
        };
        self.engine
            .insert(&uuid_key(&KeyPrefix::Preset, id), &encode(&preset)?)?;
        self.engine.insert(&idx_key, id.as_bytes())?;
        Ok(PresetId(id))
    }

    #[instrument(skip(self, cancel))]
    async fn set_model_limits(
        &self,
        cancel: &CancellationToken,
        model_id: ModelId,
        min_preset_id: PresetId,
        max_preset_id: PresetId,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let mut model = self
            .load_model(model_id.0)?
            .ok_or_else(|| StoreError::NotFound(format!("model {:?}", model_id)))?;

        for preset_id in [min_preset_id, max_preset_id] {
            let preset = self
                .load_preset(preset_id.0)?
                .ok_or_else(|| StoreError::NotFound(format!("preset {:?}", preset_id)))?;
            if preset.model_id != model_id {
                return Err(StoreError::PresetNotInModel {
                    model_id,
                    preset_id,
                });
            }
        }

        model.min_preset_id = Some(min_preset_id);
        model.max_preset_id = Some(max_preset_id);
        self.engine
            .insert(&uuid_key(&KeyPrefix::Model, model_id.0), &encode(&model)?)
    }

    #[instrument(skip(self, cancel))]
    async fn get_or_create_model(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Model, StoreError> {
        check(cancel)?;
        let idx_key = string_key(&KeyPrefix::ModelByName, name);
        if let Some(bytes) = self.engine.get(&idx_key)? {
            let id = decode_uuid_value(&bytes)
                .ok_or_else(|| StoreError::Decode("model index value was not a uuid".into()))?;
            if let Some(model) = self.load_model(id)? {
                return Ok(model);
            }
        }
        let id = new_uuid();
        let model = Model {
            id: ModelId(id),
            name: name.to_string(),
            min_preset_id: None,
            max_preset_id: None,
        };
        self.engine
            .insert(&uuid_key(&KeyPrefix::Model, id), &encode(&model)?)?;
        self.engine.insert(&idx_key, id.as_bytes())?;
        debug!(model = name, "registered new model");
        Ok(model)
    }

    async fn get_model(
        &self,
        cancel: &CancellationToken,
        model_id: ModelId,
    ) -> Result<Option<Model>, StoreError> {
        check(cancel)?;
        self.load_model(model_id.0)
    }

    #[instrument(skip(self, cancel))]
    async fn upsert_miner(
        &self,
        cancel: &CancellationToken,
        spec: MinerSpec,
    ) -> Result<MinerId, StoreError> {
        check(cancel)?;
        let idx_key = string_key(&KeyPrefix::MinerByMac, &spec.mac.0);
        let id = match self.engine.get(&idx_key)? {
            Some(bytes) => decode_uuid_value(&bytes)
                .ok_or_else(|| StoreError::Decode("miner index value was not a uuid".into()))?,
            None => new_uuid(),
        };
        let now = self.clock.now();
        let miner = pb_shared_types::Miner {
            id: MinerId(id),
            mac: spec.mac,
            ip: spec.ip,
            firmware_family: spec.firmware_family,
            model_id: spec.model_id,
            current_preset_id: spec.current_preset_id,
            online: true,
            last_seen: now,
        };
        // Miner record, MAC index, and (when new) its default BalanceConfig
        // land together or not at all, per the FK invariant between a miner
        // and its config row.
        let mut writes = vec![
            (uuid_key(&KeyPrefix::Miner, id), encode(&miner)?),
            (idx_key, id.as_bytes().to_vec()),
        ];
        if self.load_config(id)?.is_none() {
            let config = BalanceConfig::default_for(MinerId(id));
            writes.push((uuid_key(&KeyPrefix::BalanceConfig, id), encode(&config)?));
        }
        self.engine.apply_batch(&writes)?;
        Ok(MinerId(id))
    }

    async fn set_miner_online(
        &self,
        cancel: &CancellationToken,
        id: MinerId,
        online: bool,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let mut miner = self
            .load_miner(id.0)?
            .ok_or_else(|| StoreError::NotFound(format!("miner {:?}", id)))?;
        miner.online = online;
        if online {
            miner.last_seen = self.clock.now();
        }
        self.save_miner(&miner)
    }

    #[instrument(skip(self, cancel))]
    async fn mark_all_miners_offline(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        check(cancel)?;
        for (_, value) in self.engine.scan_prefix(&KeyPrefix::Miner.prefix())? {
            let mut miner: pb_shared_types::Miner = decode(&value)?;
            if miner.online {
                miner.online = false;
                self.save_miner(&miner)?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, cancel))]
    async fn get_manageable_miners(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<MinerWithContext>, StoreError> {
        check(cancel)?;
        let all_presets: Vec<Preset> = self
            .engine
            .scan_prefix(&KeyPrefix::Preset.prefix())?
            .into_iter()
            .map(|(_, v)| decode::<Preset>(&v))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        for (_, value) in self.engine.scan_prefix(&KeyPrefix::Miner.prefix())? {
            let miner: pb_shared_types::Miner = decode(&value)?;
            if !miner.online || !miner.firmware_family.is_balanceable() {
                continue;
            }
            let Some(config) = self.load_config(miner.id.0)? else {
                continue;
            };
            if !config.enabled || config.locked {
                continue;
            }
            let Some(model_id) = miner.model_id else {
                continue;
            };
            let Some(model) = self.load_model(model_id.0)? else {
                continue;
            };
            if !model.is_configured() {
                continue;
            }
            let (Some(current_id), Some(min_id), Some(max_id)) =
                (miner.current_preset_id, model.min_preset_id, model.max_preset_id)
            else {
                continue;
            };
            let (Some(current), Some(min_preset), Some(max_preset)) = (
                self.load_preset(current_id.0)?,
                self.load_preset(min_id.0)?,
                self.load_preset(max_id.0)?,
            ) else {
                warn!(miner_id = ?miner.id, "manageable miner has unresolved preset pointer");
                continue;
            };
            let cooldown = self.load_cooldown(miner.id.0)?;
            let presets = all_presets
                .iter()
                .filter(|p| p.model_id == model.id)
                .cloned()
                .collect();
            out.push(MinerWithContext {
                miner,
                model,
                current,
                min_preset,
                max_preset,
                config,
                cooldown,
                presets,
            });
        }
        // Deterministic ordering for tie-breaks in strategy selection (section 4.4).
        out.sort_by_key(|m| m.miner.ip);
        Ok(out)
    }

    #[instrument(skip(self, cancel))]
    async fn set_cooldown(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        if let Some(old) = self.load_cooldown(miner_id.0)? {
            self.engine.remove(&timestamp_id_key(
                &KeyPrefix::CooldownByUntil,
                old.until,
                miner_id.0,
            ))?;
        }
        let cooldown = Cooldown { miner_id, until };
        self.engine.insert(
            &uuid_key(&KeyPrefix::Cooldown, miner_id.0),
            &encode(&cooldown)?,
        )?;
        self.engine.insert(
            &timestamp_id_key(&KeyPrefix::CooldownByUntil, until, miner_id.0),
            &[],
        )
    }

    #[instrument(skip(self, cancel))]
    async fn cleanup_expired_cooldowns(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, StoreError> {
        check(cancel)?;
        let now = self.clock.now();
        let prefix = KeyPrefix::CooldownByUntil.prefix();
        let mut end = prefix.clone();
        end.extend_from_slice(&timestamp_millis_be(now));
        let expired = self.engine.scan_range(&prefix, &end)?;
        let mut removed = 0;
        for (key, _) in expired {
            let Some((_, miner_id)) = split_timestamp_id_key(&key, prefix.len()) else {
                continue;
            };
            self.engine.remove(&key)?;
            self.engine.remove(&uuid_key(&KeyPrefix::Cooldown, miner_id))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "cleaned up expired cooldowns");
        }
        Ok(removed)
    }

    #[instrument(skip(self, cancel))]
    async fn create_pending_change(
        &self,
        cancel: &CancellationToken,
        change: PendingChange,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        self.engine
            .insert(&uuid_key(&KeyPrefix::Pending, change.id), &encode(&change)?)?;
        self.engine.insert(
            &timestamp_id_key(&KeyPrefix::PendingBySettlesAt, change.settles_at, change.id),
            &[],
        )
    }

    async fn sum_pending_delta(&self, cancel: &CancellationToken) -> Result<i64, StoreError> {
        check(cancel)?;
        let mut sum: i64 = 0;
        for (_, value) in self.engine.scan_prefix(&KeyPrefix::Pending.prefix())? {
            let change: PendingChange = decode(&value)?;
            sum += change.expected_delta_w;
        }
        Ok(sum)
    }

    #[instrument(skip(self, cancel))]
    async fn clear_settled_changes(&self, cancel: &CancellationToken) -> Result<usize, StoreError> {
        check(cancel)?;
        // settles_at <= now: the range upper bound is exclusive, so push it
        // one millisecond past `now` to include changes settling this instant.
        let now = self.clock.now() + Duration::milliseconds(1);
        let prefix = KeyPrefix::PendingBySettlesAt.prefix();
        let mut end = prefix.clone();
        end.extend_from_slice(&timestamp_millis_be(now));
        let settled = self.engine.scan_range(&prefix, &end)?;
        let mut removed = 0;
        for (key, _) in settled {
            let Some((_, change_id)) = split_timestamp_id_key(&key, prefix.len()) else {
                continue;
            };
            self.engine.remove(&key)?;
            self.engine
                .remove(&uuid_key(&KeyPrefix::Pending, change_id))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "cleared settled pending changes");
        }
        Ok(removed)
    }

    #[instrument(skip(self, cancel))]
    async fn clear_pending_for_offline_miners(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, StoreError> {
        check(cancel)?;
        let mut removed = 0;
        for (_, value) in self.engine.scan_prefix(&KeyPrefix::Pending.prefix())? {
            let change: PendingChange = decode(&value)?;
            let miner = self.load_miner(change.miner_id.0)?;
            let offline = miner.map(|m| !m.online).unwrap_or(true);
            if offline {
                self.engine
                    .remove(&uuid_key(&KeyPrefix::Pending, change.id))?;
                self.engine.remove(&timestamp_id_key(
                    &KeyPrefix::PendingBySettlesAt,
                    change.settles_at,
                    change.id,
                ))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn insert_energy_reading(
        &self,
        cancel: &CancellationToken,
        reading: EnergyReading,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let key = timestamp_id_key(&KeyPrefix::Reading, reading.timestamp, new_uuid());
        self.engine.insert(&key, &encode(&reading)?)
    }

    async fn insert_change_log(
        &self,
        cancel: &CancellationToken,
        log: ChangeLog,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let key = timestamp_id_key(&KeyPrefix::ChangeLog, log.issued_at, log.id);
        self.engine.insert(&key, &encode(&log)?)
    }

    async fn recent_change_logs(
        &self,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<ChangeLog>, StoreError> {
        check(cancel)?;
        let mut rows = self
            .engine
            .scan_prefix(&KeyPrefix::ChangeLog.prefix())?;
        rows.reverse();
        rows.truncate(limit);
        rows.into_iter().map(|(_, v)| decode(&v)).collect()
    }

    async fn recent_energy_readings(
        &self,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<EnergyReading>, StoreError> {
        check(cancel)?;
        let mut rows = self.engine.scan_prefix(&KeyPrefix::Reading.prefix())?;
        rows.reverse();
        rows.truncate(limit);
        rows.into_iter().map(|(_, v)| decode(&v)).collect()
    }

    async fn update_miner_current_preset(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
        preset_id: PresetId,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let mut miner = self
            .load_miner(miner_id.0)?
            .ok_or_else(|| StoreError::NotFound(format!("miner {:?}", miner_id)))?;
        miner.current_preset_id = Some(preset_id);
        self.save_miner(&miner)
    }

    async fn count_miners_on_cooldown(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, StoreError> {
        check(cancel)?;
        let now = self.clock.now();
        let mut count = 0;
        for (_, value) in self.engine.scan_prefix(&KeyPrefix::Cooldown.prefix())? {
            let cooldown: Cooldown = decode(&value)?;
            if cooldown.until > now {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_balance_config(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
    ) -> Result<Option<BalanceConfig>, StoreError> {
        check(cancel)?;
        self.load_config(miner_id.0)
    }

    async fn set_balance_config(
        &self,
        cancel: &CancellationToken,
        config: BalanceConfig,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        self.engine.insert(
            &uuid_key(&KeyPrefix::BalanceConfig, config.miner_id.0),
            &encode(&config)?,
        )
    }

    async fn get_presets_for_model(
        &self,
        cancel: &CancellationToken,
        model_id: ModelId,
    ) -> Result<Vec<Preset>, StoreError> {
        check(cancel)?;
        self.engine
            .scan_prefix(&KeyPrefix::Preset.prefix())?
            .into_iter()
            .map(|(_, v)| decode::<Preset>(&v))
            .filter(|p| matches!(p, Ok(p) if p.model_id == model_id))
            .collect()
    }
}
