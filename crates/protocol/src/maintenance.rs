//! Background maintenance: ledger sealing, global model aggregation, and
//! session expiry on a fixed interval.
//!
//! Each cycle runs the three steps independently. A failing step is logged
//! and skipped; the loop keeps going until [`ProtocolOrchestrator::stop`].

use crate::error::{ProtocolError, Result};
use crate::orchestrator::{Inner, ProtocolOrchestrator};
use crate::status::MaintenanceReport;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use voltmesh_core::{current_timestamp_ms, Timestamp};
use voltmesh_federated::{aggregate_up, AggregationError};

/// Running maintenance task.
pub(crate) struct MaintenanceHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl ProtocolOrchestrator {
    /// Spawn the maintenance task on the current Tokio runtime.
    ///
    /// Returns `false` if it is already running.
    pub fn start(&self) -> Result<bool> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ProtocolError::NoRuntime)?;

        let mut slot = self.inner.maintenance.lock();
        if slot.as_ref().is_some_and(MaintenanceHandle::is_running) {
            debug!("Maintenance already running");
            return Ok(false);
        }

        let interval_secs = self.inner.config.maintenance.interval_secs;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn(maintenance_loop(
            Arc::downgrade(&self.inner),
            Duration::from_secs(interval_secs),
            stop_rx,
        ));
        *slot = Some(MaintenanceHandle { stop_tx, task });

        info!(interval_secs, "Maintenance started");
        Ok(true)
    }

    /// Signal the maintenance task and wait for it to exit, aborting it
    /// after the configured shutdown timeout.
    ///
    /// Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let handle = {
            let mut slot = self.inner.maintenance.lock();
            slot.take()
        };
        let Some(MaintenanceHandle { stop_tx, task }) = handle else {
            return false;
        };

        let _ = stop_tx.send(true);
        let timeout = Duration::from_secs(self.inner.config.maintenance.shutdown_timeout_secs);
        let abort = task.abort_handle();
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => info!("Maintenance stopped"),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Maintenance did not stop in time, aborting"
                );
                abort.abort();
            }
        }
        true
    }

    pub fn is_maintenance_running(&self) -> bool {
        self.inner
            .maintenance
            .lock()
            .as_ref()
            .is_some_and(MaintenanceHandle::is_running)
    }

    /// Run one maintenance pass now.
    pub fn run_maintenance_cycle(&self) -> MaintenanceReport {
        self.run_maintenance_cycle_at(current_timestamp_ms())
    }

    /// Run one maintenance pass, judging session expiry at `now`.
    pub fn run_maintenance_cycle_at(&self, now: Timestamp) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.inner.ledger.lock().mine_block() {
            Ok(sealed) => report.block_sealed = sealed,
            Err(err) => {
                warn!(error = %err, "Ledger sealing failed");
                report.failed_steps.push("seal_ledger".to_string());
            }
        }

        match self.aggregate_global() {
            Ok(Some(distributed)) => {
                report.global_aggregated = true;
                report.models_distributed = distributed;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "Global model aggregation failed");
                report.failed_steps.push("aggregate_models".to_string());
            }
        }

        report.sessions_expired = self.expire_sessions(now);

        debug!(
            block_sealed = report.block_sealed,
            global_aggregated = report.global_aggregated,
            sessions_expired = report.sessions_expired,
            "Maintenance cycle complete"
        );
        report
    }

    /// Fold trained edge models into the global model and push it back down.
    ///
    /// `None` when no edge model is trained yet.
    fn aggregate_global(&self) -> Result<Option<usize>> {
        let snapshot = {
            let models = self.inner.models.lock();
            if models.global().is_none() {
                return Ok(None);
            }
            models.edge_parameters(None)
        };

        // Averaging runs without the lock held
        let aggregated = match aggregate_up(&snapshot) {
            Ok(params) => params,
            Err(AggregationError::NoTrainedChildren) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut models = self.inner.models.lock();
        models.apply_global(aggregated)?;
        let distributed = models.distribute_global_model(None);
        info!(edges = snapshot.len(), distributed, "Global model aggregated");
        Ok(Some(distributed))
    }
}

async fn maintenance_loop(
    inner: Weak<Inner>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                ProtocolOrchestrator { inner }.run_maintenance_cycle();
            }
        }
    }

    debug!("Maintenance task exited");
}
