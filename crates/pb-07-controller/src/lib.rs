//! Executes one proposed [`PresetChange`] (section 4.5).
//!
//! Step 1 (`Driver.SetPreset`) is the only step that can abort the change;
//! steps 2-5 are best-effort and their failures are logged, not propagated,
//! because the firmware has already accepted the request and leaving the
//! bookkeeping undone is worse than a stale audit row.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pb_01_store::BalanceStore;
use pb_05_cooldowns::Cooldowns;
use pb_shared_types::{ChangeLog, ChangeReason, MinerDriver, PendingChange, PresetChange};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Controller {
    store: Arc<dyn BalanceStore>,
    cooldowns: Cooldowns,
    cooldown_duration: Duration,
    settle_time: Duration,
}

impl Controller {
    pub fn new(
        store: Arc<dyn BalanceStore>,
        cooldown_duration: Duration,
        settle_time: Duration,
    ) -> Self {
        let cooldowns = Cooldowns::new(store.clone());
        Self {
            store,
            cooldowns,
            cooldown_duration,
            settle_time,
        }
    }

    /// Applies one proposed change against the given driver. Returns `true`
    /// if the firmware accepted the request (step 1 succeeded), regardless
    /// of whether the best-effort bookkeeping steps that follow succeeded.
    pub async fn apply(
        &self,
        cancel: &CancellationToken,
        driver: &dyn MinerDriver,
        change: &PresetChange,
        reason: ChangeReason,
        margin_percent_at_issue: f64,
    ) -> bool {
        let issued_at = Utc::now();

        if let Err(e) = driver.set_preset(change.ip, &change.to_preset.name).await {
            warn!(
                miner_id = ?change.miner_id,
                ip = %change.ip,
                error = %e,
                "SetPreset rejected, marking miner offline"
            );
            let log = ChangeLog {
                id: Uuid::new_v4(),
                miner_id: change.miner_id,
                model_id: Some(change.model_id),
                from_preset_name: change.from_preset.name.clone(),
                to_preset_name: change.to_preset.name.clone(),
                expected_delta_w: change.expected_delta_w,
                reason,
                margin_percent_at_issue,
                success: false,
                error: Some(e.to_string()),
                issued_at,
            };
            if let Err(e) = self.store.insert_change_log(cancel, log).await {
                warn!(error = %e, "failed to record failed-change audit log");
            }
            // Connectivity signal: a miner that rejected SetPreset is
            // treated as unreachable until the next discovery probe.
            if let Err(e) = self.store.set_miner_online(cancel, change.miner_id, false).await {
                warn!(error = %e, "failed to mark miner offline after rejected SetPreset");
            }
            return false;
        }

        info!(
            miner_id = ?change.miner_id,
            from_preset = %change.from_preset.name,
            to_preset = %change.to_preset.name,
            expected_delta_w = change.expected_delta_w,
            %reason,
            "preset change applied"
        );

        if let Err(e) = self
            .cooldowns
            .set(cancel, change.miner_id, issued_at, self.cooldown_duration)
            .await
        {
            warn!(error = %e, "failed to set cooldown after applied change");
        }

        let settles_at = issued_at
            + chrono::Duration::from_std(self.settle_time)
                .unwrap_or_else(|_| chrono::Duration::zero());
        if let Err(e) = self
            .store
            .create_pending_change(
                cancel,
                PendingChange {
                    id: Uuid::new_v4(),
                    miner_id: change.miner_id,
                    from_preset_id: change.from_preset.id,
                    to_preset_id: change.to_preset.id,
                    expected_delta_w: change.expected_delta_w,
                    issued_at,
                    settles_at,
                },
            )
            .await
        {
            warn!(error = %e, "failed to record pending change");
        }

        if let Err(e) = self
            .store
            .update_miner_current_preset(cancel, change.miner_id, change.to_preset.id)
            .await
        {
            warn!(error = %e, "failed to update miner's optimistic current preset");
        }

        let log = ChangeLog {
            id: Uuid::new_v4(),
            miner_id: change.miner_id,
            model_id: Some(change.model_id),
            from_preset_name: change.from_preset.name.clone(),
            to_preset_name: change.to_preset.name.clone(),
            expected_delta_w: change.expected_delta_w,
            reason,
            margin_percent_at_issue,
            success: true,
            error: None,
            issued_at,
        };
        if let Err(e) = self.store.insert_change_log(cancel, log).await {
            warn!(error = %e, "failed to record applied-change audit log");
        }

        true
    }
}
