//! Cooldown enforcement: a thin wrapper over the store's cooldown table
//! (section 4.3). Owns no state of its own; exists so the controller and
//! balancer depend on a named, single-purpose collaborator rather than
//! reaching into `BalanceStore` directly for this one temporal rule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pb_shared_types::{MinerId, StoreError};
use pb_01_store::BalanceStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Enforces: once a miner has been issued a preset change, it cannot be
/// issued another until `now >= until`, where `until = issued_at + cooldown_duration`.
pub struct Cooldowns {
    store: Arc<dyn BalanceStore>,
}

impl Cooldowns {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self { store }
    }

    /// Starts (or restarts) a miner's cooldown, `cooldown_duration` from `issued_at`.
    pub async fn set(
        &self,
        cancel: &CancellationToken,
        miner_id: MinerId,
        issued_at: DateTime<Utc>,
        cooldown_duration: Duration,
    ) -> Result<(), StoreError> {
        let until = issued_at
            + chrono::Duration::from_std(cooldown_duration)
                .unwrap_or_else(|_| chrono::Duration::zero());
        self.store.set_cooldown(cancel, miner_id, until).await
    }

    /// Deletes expired cooldowns; runs every tick (section 4.3). Returns the count removed.
    pub async fn cleanup_expired(&self, cancel: &CancellationToken) -> Result<usize, StoreError> {
        let removed = self.store.cleanup_expired_cooldowns(cancel).await?;
        if removed > 0 {
            debug!(removed, "cooldowns expired");
        }
        Ok(removed)
    }

    /// Count of miners currently within an active cooldown; drives the UI (section 4.3).
    pub async fn count_active(&self, cancel: &CancellationToken) -> Result<usize, StoreError> {
        self.store.count_miners_on_cooldown(cancel).await
    }
}
