//! Inbound port: the full store contract, per `SPEC_FULL.md` section 4.1.
//!
//! Every operation takes an explicit [`CancellationToken`] (section 5);
//! the store checks it at entry and returns [`StoreError::Cancelled`]
//! rather than beginning work that would be discarded anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pb_shared_types::{
    BalanceConfig, ChangeLog, EnergyReading, MinerId, MinerSpec, MinerWithContext, Model, ModelId,
    PresetId, PresetSpec, StoreError,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// (model, name) idempotent upsert of preset attributes.
    async fn upsert_model_preset(
        &self,
        cancel: &CancellationToken,
        spec: PresetSpec,
    ) -> Result<PresetId, StoreError>;

    /// Validates both bounds belong to the model before setting them.
    async fn set_model_limits(
        &self,
        cancel: &CancellationToken,
        model_id: ModelId,
        min_preset_id: PresetId,
        max_preset_id: PresetId,
    ) -> Result<(), StoreError>;

    async fn get_or_create_model(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Model, StoreError>;

    async fn get_model(
        &self,
        cancel: &CancellationToken,
        model_id: ModelId,
    ) -> Result<Option<Model>, StoreError>;

    /// Keyed by MAC; returns a stable id. Atomically creates a default
    /// `BalanceConfig` if absent (section 4.1 FK invariant).
    async fn upsert_miner(
        &self,
        cancel: &CancellationToken,
        spec: MinerSpec,
    ) -> Result<MinerId, StoreError>;

    async fn set_miner_online(
        &self,
        cancel: &CancellationToken,
        id: MinerId,
        online: bool,
    ) -> Result<(), StoreError>;

    /// The discovery pre-sweep: every miner goes offline before the scan.
    async fn mark_all_miners_offline(&self, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Rows where config allows, firmware is balanceable, miner is online,
    /// model has both bounds set, and current/min/max presets all resolve.
    async fn get_manageable_miners(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<MinerWithContext>, StoreError>;

    async fn set_cooldown(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Deletes cooldowns with `until < now`; returns the count removed.
    async fn cleanup_expired_cooldowns(&self, cancel: &CancellationToken)
        -> Result<usize, StoreError>;

    async fn create_pending_change(
        &self,
        cancel: &CancellationToken,
        change: pb_shared_types::PendingChange,
    ) -> Result<(), StoreError>;

    async fn sum_pending_delta(&self, cancel: &CancellationToken) -> Result<i64, StoreError>;

    /// Deletes pending changes with `settles_at <= now`; returns the count removed.
    async fn clear_settled_changes(&self, cancel: &CancellationToken) -> Result<usize, StoreError>;

    /// Deletes pending changes whose miner is offline; returns the count removed.
    async fn clear_pending_for_offline_miners(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, StoreError>;

    async fn insert_energy_reading(
        &self,
        cancel: &CancellationToken,
        reading: EnergyReading,
    ) -> Result<(), StoreError>;

    async fn insert_change_log(
        &self,
        cancel: &CancellationToken,
        log: ChangeLog,
    ) -> Result<(), StoreError>;

    async fn recent_change_logs(
        &self,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<ChangeLog>, StoreError>;

    async fn recent_energy_readings(
        &self,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<EnergyReading>, StoreError>;

    async fn update_miner_current_preset(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
        preset_id: PresetId,
    ) -> Result<(), StoreError>;

    /// Count of miners currently within an active cooldown; drives the
    /// status snapshot (section 6.5).
    async fn count_miners_on_cooldown(&self, cancel: &CancellationToken)
        -> Result<usize, StoreError>;

    /// The operator-facing policy surface named in section 3: `enabled`,
    /// `priority`, `locked`. No dashboard ships with this crate, but the
    /// store owns this row like every other persisted entity, so it is
    /// read-through/write-through like the rest of the contract.
    async fn get_balance_config(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
    ) -> Result<Option<BalanceConfig>, StoreError>;

    async fn set_balance_config(
        &self,
        cancel: &CancellationToken,
        config: BalanceConfig,
    ) -> Result<(), StoreError>;

    /// Used by discovery (section 4.7 step 4) to decide whether a model's
    /// preset menu still needs populating, and to resolve a firmware-reported
    /// current-preset name to a stable [`PresetId`].
    async fn get_presets_for_model(
        &self,
        cancel: &CancellationToken,
        model_id: ModelId,
    ) -> Result<Vec<pb_shared_types::Preset>, StoreError>;
}

pub(crate) fn new_uuid() -> Uuid {
    Uuid::new_v4()
}
