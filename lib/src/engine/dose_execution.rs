// lib/src/engine/dose_execution.rs

use std::time::Duration;

use log::{info, warn};
use models::{DeviceEvent, DoseEvent, DoseOutcome, DosingError, DosingResult};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::device::{DispenseCommand, DispenseReport};

use super::DosingEngine;

/// One-way commitment over the witness signature, stored on the dose event
/// as part of the regulatory audit trail.
pub fn signature_digest(witness_signature: &str) -> String {
    format!("{:x}", Sha256::digest(witness_signature.as_bytes()))
}

fn cancel_requested(cancel: &mut Option<oneshot::Receiver<()>>) -> bool {
    match cancel {
        Some(rx) => matches!(rx.try_recv(), Ok(())),
        None => false,
    }
}

impl DosingEngine {
    /// Executes a single in-clinic dispense through the device gateway.
    ///
    /// The dose event is persisted before the device is commanded and the
    /// ledger is written only after the outcome is recorded, so a crash at
    /// any point leaves a reconcilable trail. A cancellation arriving after
    /// the device call has been issued does not stop the outcome from being
    /// recorded; medication may already have left the bottle.
    pub async fn execute_dose(
        &self,
        actor: &str,
        patient_id: i32,
        requested_ml: f64,
        witness_signature: &str,
        mut cancel: Option<oneshot::Receiver<()>>,
    ) -> DosingResult<DoseEvent> {
        if actor.trim().is_empty() {
            return Err(DosingError::InvalidData("actor must not be empty".into()));
        }
        if !(requested_ml > 0.0) {
            return Err(DosingError::InvalidData(format!(
                "requested volume must be positive, got {}",
                requested_ml
            )));
        }
        if witness_signature.trim().is_empty() {
            return Err(DosingError::InvalidData(
                "witness signature must not be empty".into(),
            ));
        }

        let status = self.device.status().await;
        if !status.ready {
            return Err(DosingError::DeviceNotReady(status.detail));
        }
        let bottle_serial = status
            .bottle_serial
            .ok_or_else(|| DosingError::DeviceNotReady("no bottle loaded".into()))?;
        self.storage
            .get_bottle(&bottle_serial)
            .await?
            .ok_or_else(|| DosingError::BottleNotFound(bottle_serial.clone()))?;

        let event = self
            .storage
            .insert_dose_event(DoseEvent::pending(
                patient_id,
                requested_ml,
                &bottle_serial,
                &status.device_id,
                witness_signature,
            ))
            .await?;
        info!(
            "dose event {} created for patient {} ({} ml requested from {})",
            event.id, patient_id, requested_ml, bottle_serial
        );

        let hash = signature_digest(witness_signature);

        if cancel_requested(&mut cancel) {
            let events = vec![DeviceEvent::new(
                "cancelled",
                json!({ "stage": "before_dispatch" }),
            )];
            let event = self
                .storage
                .complete_dose_event(event.id, 0.0, DoseOutcome::Aborted, events, hash)
                .await?;
            self.record_audit(
                "dose.execute",
                event.id.to_string(),
                actor,
                json!({ "patient_id": patient_id, "outcome": "aborted", "cancelled": true }),
            )
            .await;
            return Ok(event);
        }

        let command = DispenseCommand {
            command_token: event.id.to_string(),
            requested_ml,
        };
        // The gateway guards its own round trips, but a second fence here
        // keeps a misbehaving implementation from hanging the coordinator.
        let report = match timeout(
            Duration::from_millis(self.config.device_timeout_ms),
            self.device.dispense(command),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    "device {} did not answer dose event {} within {} ms",
                    status.device_id, event.id, self.config.device_timeout_ms
                );
                DispenseReport::aborted(vec![DeviceEvent::new(
                    "link_timeout",
                    json!({ "timeout_ms": self.config.device_timeout_ms }),
                )])
            }
        };

        let event = self
            .storage
            .complete_dose_event(
                event.id,
                report.actual_ml,
                report.outcome,
                report.events,
                hash,
            )
            .await?;

        if event.outcome == Some(DoseOutcome::Success) {
            // Downstream accounting uses the actual delivered volume, never
            // the requested one.
            self.debit_bottle_for_event(&event, actor)
                .await
                .map_err(|e| {
                    warn!(
                        "dose event {} dispensed {} ml but inventory update failed: {}",
                        event.id, event.dispensed_ml, e
                    );
                    DosingError::PostDispenseFailure {
                        dose_event_id: event.id,
                        dispensed_ml: event.dispensed_ml,
                    }
                })?;
        }

        self.record_audit(
            "dose.execute",
            event.id.to_string(),
            actor,
            json!({
                "patient_id": patient_id,
                "outcome": event.outcome,
                "dispensed_ml": event.dispensed_ml,
            }),
        )
        .await;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use models::{DoseOutcome, DosingError};
    use sha2::{Digest, Sha256};
    use tokio::sync::oneshot;

    use crate::engine::testutil::harness;
    use crate::storage::DosingStorage;

    #[tokio::test]
    async fn successful_dispense_updates_inventory() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;

        let event = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "witness-sig", None)
            .await
            .unwrap();

        assert_eq!(event.outcome, Some(DoseOutcome::Success));
        assert_eq!(event.dispensed_ml, 50.0);
        let bottle = h.storage.get_bottle("B1").await.unwrap().unwrap();
        assert_eq!(bottle.current_volume_ml, 450.0);

        let ledger = h.storage.ledger_for_bottle("B1").await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].qty_ml, -50.0);
        assert_eq!(ledger[0].dose_event_id, Some(event.id));
        h.assert_ledger_reconciles("B1").await;
    }

    #[tokio::test]
    async fn device_fault_yields_aborted_event_not_an_error() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.device.inject_fault_once();

        let event = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "witness-sig", None)
            .await
            .unwrap();

        assert_eq!(event.outcome, Some(DoseOutcome::Aborted));
        assert_eq!(event.dispensed_ml, 0.0);
        assert!(event
            .device_events
            .iter()
            .any(|e| e.event_type == "device_fault"));
        assert!(h.storage.ledger_for_bottle("B1").await.unwrap().is_empty());
        assert_eq!(
            h.storage.get_bottle("B1").await.unwrap().unwrap().current_volume_ml,
            500.0
        );
    }

    #[tokio::test]
    async fn unready_device_fails_fast_without_a_dose_event() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.device.set_ready(false);

        let err = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "witness-sig", None)
            .await
            .unwrap_err();

        assert!(matches!(err, DosingError::DeviceNotReady(_)));
        assert!(h.storage.get_dose_event(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overdraw_surfaces_post_dispense_failure() {
        let h = harness();
        h.seed_bottle("B1", 10.0).await;

        // The simulated device happily delivers 50 ml the bottle row cannot
        // cover; the event stands but the caller is told not to retry.
        let err = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "witness-sig", None)
            .await
            .unwrap_err();

        match err {
            DosingError::PostDispenseFailure {
                dose_event_id,
                dispensed_ml,
            } => {
                assert_eq!(dispensed_ml, 50.0);
                let event = h
                    .storage
                    .get_dose_event(dose_event_id)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(event.outcome, Some(DoseOutcome::Success));
            }
            other => panic!("expected PostDispenseFailure, got {:?}", other),
        }
        assert_eq!(
            h.storage.get_bottle("B1").await.unwrap().unwrap().current_volume_ml,
            10.0
        );
        assert!(h.storage.ledger_for_bottle("B1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn signature_hash_is_a_real_digest() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;

        let event = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "witness-sig", None)
            .await
            .unwrap();

        let expected = format!("{:x}", Sha256::digest(b"witness-sig"));
        assert_eq!(event.signature_hash.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_records_an_aborted_event() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        let event = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "witness-sig", Some(rx))
            .await
            .unwrap();

        assert_eq!(event.outcome, Some(DoseOutcome::Aborted));
        assert!(event.device_events.iter().any(|e| e.event_type == "cancelled"));
        assert!(h.storage.ledger_for_bottle("B1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_dispenses_against_one_bottle_serialize() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;

        let (first, second) = tokio::join!(
            h.engine.execute_dose("nurse.ok", 7, 50.0, "sig-one", None),
            h.engine.execute_dose("nurse.ok", 8, 30.0, "sig-two", None),
        );
        first.unwrap();
        second.unwrap();

        let bottle = h.storage.get_bottle("B1").await.unwrap().unwrap();
        assert_eq!(bottle.current_volume_ml, 420.0);
        assert_eq!(h.storage.ledger_for_bottle("B1").await.unwrap().len(), 2);
        h.assert_ledger_reconciles("B1").await;
    }

    #[tokio::test]
    async fn rejects_nonpositive_volume_and_blank_witness() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;

        let err = h
            .engine
            .execute_dose("nurse.ok", 7, 0.0, "witness-sig", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DosingError::InvalidData(_)));

        let err = h
            .engine
            .execute_dose("nurse.ok", 7, 50.0, "   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DosingError::InvalidData(_)));
    }
}
