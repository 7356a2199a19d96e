//! The periodic tick and five-state control machine (section 4.6).
//!
//! `recoveryEnteredAt` and the `SystemStatus` snapshot are the only
//! balance-loop-scoped mutable singletons (section 9): both are fields of
//! this struct, owned by the task that calls `tick`. Readers of the status
//! snapshot take a read lock and copy it out; the tick takes a write lock
//! only for the swap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pb_01_store::BalanceStore;
use pb_05_cooldowns::Cooldowns;
use pb_06_strategy::{propose_increase, propose_reduction};
use pb_07_controller::Controller;
use pb_shared_types::{ChangeReason, ControlState, MinerDriver, ReadingSource, SystemStatus};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::BalancerRuntimeConfig;

pub struct Balancer {
    store: Arc<dyn BalanceStore>,
    reading_source: Arc<dyn ReadingSource>,
    driver: Arc<dyn MinerDriver>,
    cooldowns: Cooldowns,
    controller: Arc<Controller>,
    config: BalancerRuntimeConfig,
    state: ControlState,
    recovery_entered_at: Option<DateTime<Utc>>,
    status: Arc<RwLock<SystemStatus>>,
    tick_seq: u64,
}

impl Balancer {
    pub fn new(
        store: Arc<dyn BalanceStore>,
        reading_source: Arc<dyn ReadingSource>,
        driver: Arc<dyn MinerDriver>,
        config: BalancerRuntimeConfig,
    ) -> Self {
        let cooldowns = Cooldowns::new(store.clone());
        let controller = Arc::new(Controller::new(
            store.clone(),
            config.cooldown_duration,
            config.settle_time,
        ));
        Self {
            store,
            reading_source,
            driver,
            cooldowns,
            controller,
            config,
            state: ControlState::Idle,
            recovery_entered_at: None,
            status: Arc::new(RwLock::new(SystemStatus::default())),
            tick_seq: 0,
        }
    }

    /// A cheap clone of the current status snapshot, for dashboard/API reads
    /// (section 6.5, 10.5). Never blocks on the tick longer than the swap.
    pub fn status_handle(&self) -> Arc<RwLock<SystemStatus>> {
        self.status.clone()
    }

    pub async fn status(&self) -> SystemStatus {
        self.status.read().await.clone()
    }

    /// Runs one tick: fetch a reading, sweep settled bookkeeping, update the
    /// status snapshot, and dispatch to the current state's handler.
    pub async fn tick(&mut self, cancel: &CancellationToken) {
        self.tick_seq += 1;
        let span = info_span!("balance_tick", tick = self.tick_seq);
        self.tick_inner(cancel).instrument(span).await;
    }

    async fn tick_inner(&mut self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }

        let reading = match self.reading_source.fetch().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "reading fetch failed, aborting tick");
                return;
            }
        };

        if let Err(e) = self
            .store
            .insert_energy_reading(cancel, reading.clone())
            .await
        {
            warn!(error = %e, "failed to persist energy reading");
        }

        if let Err(e) = self.store.clear_settled_changes(cancel).await {
            warn!(error = %e, "failed to clear settled changes");
        }
        if let Err(e) = self.cooldowns.cleanup_expired(cancel).await {
            warn!(error = %e, "failed to clean up expired cooldowns");
        }
        if let Err(e) = self.store.clear_pending_for_offline_miners(cancel).await {
            warn!(error = %e, "failed to clear pending changes for offline miners");
        }

        let pending_delta_w = match self.store.sum_pending_delta(cancel).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to sum pending delta, aborting tick");
                return;
            }
        };

        let effective_consumption_mw = reading.consumption_mw - pending_delta_w as f64 / 1e6;
        let effective_margin_mw = reading.generation_mw - effective_consumption_mw;
        let effective_margin_percent = if reading.generation_mw > 0.0 {
            100.0 * effective_margin_mw / reading.generation_mw
        } else {
            0.0
        };

        let manageable = match self.store.get_manageable_miners(cancel).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to load manageable miners, aborting tick");
                return;
            }
        };
        let miners_on_cooldown = self.cooldowns.count_active(cancel).await.unwrap_or(0);

        {
            let mut status = self.status.write().await;
            *status = SystemStatus {
                state: self.state,
                generation_mw: reading.generation_mw,
                consumption_mw: reading.consumption_mw,
                margin_mw: reading.margin_mw,
                margin_percent: reading.margin_percent,
                pending_delta_w,
                effective_margin_percent,
                managed_miners_count: manageable.len(),
                miners_on_cooldown,
                per_source_status: reading.sources.clone(),
                last_updated: Utc::now(),
            };
        }

        // Hysteresis tracking: a continuous streak above recovery_margin,
        // reset the instant the margin dips back at or below it (section 4.6).
        if effective_margin_percent > self.config.recovery_margin {
            self.recovery_entered_at.get_or_insert_with(Utc::now);
        } else {
            self.recovery_entered_at = None;
        }

        let next_state = match self.state {
            ControlState::Idle => self.handle_idle(effective_margin_percent),
            ControlState::Reducing => {
                self.handle_reducing(cancel, effective_margin_percent, &reading, &manageable)
                    .await
            }
            ControlState::Holding => {
                self.handle_holding(cancel, effective_margin_percent, pending_delta_w)
                    .await
            }
            ControlState::Increasing => {
                self.handle_increasing(cancel, effective_margin_percent, &reading, &manageable)
                    .await
            }
            ControlState::Emergency => {
                self.handle_emergency(cancel, effective_margin_percent, &reading, &manageable)
                    .await
            }
        };

        if next_state != self.state {
            info!(from = ?self.state, to = ?next_state, margin_percent = effective_margin_percent, "state transition");
            self.state = next_state;
        }
    }

    fn handle_idle(&self, margin: f64) -> ControlState {
        if margin < self.config.critical_margin {
            return ControlState::Reducing;
        }
        if let Some(entered_at) = self.recovery_entered_at {
            let sustained = Utc::now() - entered_at;
            if sustained
                >= chrono::Duration::from_std(self.config.recovery_hysteresis)
                    .unwrap_or_else(|_| chrono::Duration::zero())
            {
                return ControlState::Increasing;
            }
        }
        ControlState::Idle
    }

    async fn handle_reducing(
        &self,
        cancel: &CancellationToken,
        margin: f64,
        reading: &pb_shared_types::EnergyReading,
        manageable: &[pb_shared_types::MinerWithContext],
    ) -> ControlState {
        if margin < self.config.emergency_margin {
            return ControlState::Emergency;
        }
        if margin >= self.config.safe_margin {
            return ControlState::Holding;
        }

        let reduction_needed_w = ((reading.consumption_mw
            - reading.generation_mw * (1.0 - self.config.safe_margin / 100.0))
            * 1e6) as i64;
        if reduction_needed_w <= 0 {
            return ControlState::Reducing;
        }

        let proposals = propose_reduction(manageable, reduction_needed_w);
        if let Some(change) = proposals.first() {
            self.controller
                .apply(cancel, self.driver.as_ref(), change, ChangeReason::Reduce, margin)
                .await;
        }
        ControlState::Reducing
    }

    async fn handle_holding(
        &self,
        _cancel: &CancellationToken,
        margin: f64,
        pending_delta_w: i64,
    ) -> ControlState {
        if margin < self.config.emergency_margin {
            return ControlState::Emergency;
        }
        if margin < self.config.critical_margin {
            return ControlState::Reducing;
        }
        if pending_delta_w == 0 && margin >= self.config.safe_margin {
            return ControlState::Idle;
        }
        ControlState::Holding
    }

    async fn handle_increasing(
        &self,
        cancel: &CancellationToken,
        margin: f64,
        reading: &pb_shared_types::EnergyReading,
        manageable: &[pb_shared_types::MinerWithContext],
    ) -> ControlState {
        if margin < self.config.safe_margin {
            return ControlState::Reducing;
        }

        // Symmetric with reducing's safe-margin target: add load until
        // consumption would bring the margin back down to `safe_margin`.
        let target_consumption_mw = reading.generation_mw * (1.0 - self.config.safe_margin / 100.0);
        let room_w = ((target_consumption_mw - reading.consumption_mw) * 1e6) as i64;
        if room_w <= 0 {
            return ControlState::Idle;
        }

        let proposals = propose_increase(manageable, room_w);
        let Some(change) = proposals.first() else {
            return ControlState::Idle;
        };
        self.controller
            .apply(cancel, self.driver.as_ref(), change, ChangeReason::Increase, margin)
            .await;
        ControlState::Increasing
    }

    async fn handle_emergency(
        &self,
        cancel: &CancellationToken,
        margin: f64,
        reading: &pb_shared_types::EnergyReading,
        manageable: &[pb_shared_types::MinerWithContext],
    ) -> ControlState {
        if margin >= self.config.critical_margin {
            return ControlState::Reducing;
        }

        let reduction_needed_w = ((reading.consumption_mw
            - reading.generation_mw * (1.0 - self.config.safe_margin / 100.0))
            * 1e6) as i64;
        let proposals = propose_reduction(manageable, reduction_needed_w.max(0));

        let batch: Vec<_> = proposals
            .into_iter()
            .take(self.config.max_parallel_emergency)
            .collect();

        let mut joins = JoinSet::new();
        for change in batch {
            let controller = self.controller.clone();
            let driver = self.driver.clone();
            let cancel = cancel.clone();
            joins.spawn(async move {
                controller
                    .apply(&cancel, driver.as_ref(), &change, ChangeReason::Emergency, margin)
                    .await;
            });
        }
        while let Some(result) = joins.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "emergency change task panicked");
            }
        }

        ControlState::Emergency
    }
}
