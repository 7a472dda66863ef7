// lib/src/engine/reconciliation.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info};
use models::{DeviceEvent, DoseOutcome, DosingResult};
use serde_json::json;
use tokio::sync::oneshot;

use crate::device::DispenseReport;
use crate::engine::dose_execution::signature_digest;

use super::DosingEngine;

impl DosingEngine {
    /// Resolves dose events left pending past the configured age: the device
    /// is asked for a terminal result by correlation token; a found report is
    /// recorded exactly as the live path would have recorded it (ledger
    /// included on success), an unknown token is closed out as aborted.
    pub async fn reconcile_pending_dose_events(&self) -> DosingResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.stale_dose_event_secs);
        let pending = self.storage.pending_dose_events_before(cutoff).await?;
        let mut reconciled = 0usize;

        for event in pending {
            let token = event.id.to_string();
            let (report, resolved_via) = match self.device.terminal_report(&token).await {
                Some(report) => (report, "device"),
                None => (
                    DispenseReport::aborted(vec![DeviceEvent::new(
                        "reconciled_timeout",
                        json!({ "stale_after_secs": self.config.stale_dose_event_secs }),
                    )]),
                    "timeout",
                ),
            };

            let hash = signature_digest(&event.witness_signature);
            let completed = self
                .storage
                .complete_dose_event(
                    event.id,
                    report.actual_ml,
                    report.outcome,
                    report.events,
                    hash,
                )
                .await?;
            if completed.outcome == Some(DoseOutcome::Success) {
                self.debit_bottle_for_event(&completed, "reconciliation").await?;
            }

            info!(
                "reconciled dose event {} via {} ({:?}, {} ml)",
                completed.id, resolved_via, completed.outcome, completed.dispensed_ml
            );
            reconciled += 1;
        }

        Ok(reconciled)
    }
}

/// Background sweep wrapper: runs reconciliation on an interval until the
/// shutdown signal fires. Spawned by the service binary.
pub async fn run_reconciliation_sweep(
    engine: Arc<DosingEngine>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup is quiet.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("reconciliation sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match engine.reconcile_pending_dose_events().await {
                    Ok(0) => {}
                    Ok(n) => info!("reconciliation sweep completed {} dose event(s)", n),
                    Err(e) => error!("reconciliation sweep failed: {}", e),
                }
            }
        }
    }
}
