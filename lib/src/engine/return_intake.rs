// lib/src/engine/return_intake.rs

use log::{info, warn};
use models::{
    ComplianceHold, DoseStatus, DosingError, DosingResult, HoldReason, InspectionOutcome,
    InventoryTransaction, ReturnInspection,
};
use serde_json::json;

use crate::config::ResiduePolicy;

use super::DosingEngine;

/// Summary handed back to the caller: whether intake raised any hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceAction {
    None,
    HoldCreated,
}

impl DosingEngine {
    /// Processes the physical return of one take-home container.
    ///
    /// Two hold triggers are independent and can both fire: an abnormal
    /// inspector outcome, and residue above the configured threshold (the
    /// latter even when the outcome is `ok`). The residue ledger movement
    /// follows the configured `ResiduePolicy` against the kit's source
    /// bottle. `sealed -> returned` is the only dose transition; a second
    /// return of the same bottle uid is rejected before any write.
    pub async fn process_return(
        &self,
        bottle_uid: &str,
        seal_intact: bool,
        residue_ml_est: f64,
        notes: &str,
        outcome: InspectionOutcome,
        inspector_id: &str,
    ) -> DosingResult<(ReturnInspection, ComplianceAction)> {
        if inspector_id.trim().is_empty() {
            return Err(DosingError::InvalidData("inspector_id must not be empty".into()));
        }
        if residue_ml_est < 0.0 {
            return Err(DosingError::InvalidData(format!(
                "residue estimate must not be negative, got {}",
                residue_ml_est
            )));
        }

        let dose = self
            .storage
            .dose_by_bottle_uid(bottle_uid)
            .await?
            .ok_or_else(|| DosingError::DoseNotFound(bottle_uid.to_string()))?;
        if dose.status == DoseStatus::Returned {
            return Err(DosingError::AlreadyReturned(bottle_uid.to_string()));
        }
        let kit = self
            .storage
            .get_kit(dose.kit_id)
            .await?
            .ok_or_else(|| {
                DosingError::InternalError(format!("kit {} missing for dose {}", dose.kit_id, dose.id))
            })?;
        let order = self
            .storage
            .get_order(kit.take_home_order_id)
            .await?
            .ok_or_else(|| {
                DosingError::InternalError(format!(
                    "order {} missing for kit {}",
                    kit.take_home_order_id, kit.id
                ))
            })?;

        let inspection = self
            .storage
            .insert_inspection(ReturnInspection::new(
                bottle_uid,
                inspector_id,
                seal_intact,
                residue_ml_est,
                notes,
                outcome,
            ))
            .await?;
        self.storage.mark_dose_returned(dose.id).await?;

        let mut reasons = Vec::new();
        match outcome {
            InspectionOutcome::DiversionSuspected => reasons.push(HoldReason::SuspectedDiversion),
            InspectionOutcome::Concern => reasons.push(HoldReason::ReturnConcern),
            InspectionOutcome::Ok => {}
        }
        let threshold = self.rules.numeric(crate::rules::RESIDUE_THRESHOLD_ML)?;
        if residue_ml_est > threshold {
            reasons.push(HoldReason::ExcessiveResidue);
        }
        for reason in &reasons {
            let hold = self
                .storage
                .insert_hold(ComplianceHold::open(order.patient_id, *reason, true, notes))
                .await?;
            warn!(
                "compliance hold {} ({:?}) created for patient {} on return of {}",
                hold.id, reason, order.patient_id, bottle_uid
            );
        }

        // Residue leaves (or re-enters) circulation against the bottle the
        // kit was filled from, per policy.
        let (delta, reason_text) = match self.config.residue_policy {
            ResiduePolicy::WriteOff => (-residue_ml_est, "returned residue written off"),
            ResiduePolicy::Restock => (residue_ml_est, "returned residue restocked"),
        };
        let lock = self.bottle_locks.handle(&kit.source_bottle);
        let _guard = lock.lock().await;
        let bottle = self
            .storage
            .get_bottle(&kit.source_bottle)
            .await?
            .ok_or_else(|| DosingError::BottleNotFound(kit.source_bottle.clone()))?;
        let tx = InventoryTransaction::take_home_return(
            &kit.source_bottle,
            delta,
            inspector_id,
            dose.id,
            reason_text,
        );
        self.storage
            .apply_volume_change(Some(bottle.current_volume_ml), tx)
            .await?;
        drop(_guard);

        let action = if reasons.is_empty() {
            ComplianceAction::None
        } else {
            ComplianceAction::HoldCreated
        };
        info!(
            "return of {} processed by {}: outcome {:?}, {} hold(s)",
            bottle_uid,
            inspector_id,
            outcome,
            reasons.len()
        );
        self.record_audit(
            "takehome.return.intake",
            inspection.id.to_string(),
            inspector_id,
            json!({
                "bottle_uid": bottle_uid,
                "outcome": outcome,
                "residue_ml_est": residue_ml_est,
                "holds": reasons.len(),
            }),
        )
        .await;

        Ok((inspection, action))
    }
}

#[cfg(test)]
mod tests {
    use models::{
        DoseStatus, DosingError, HoldReason, InspectionOutcome, TransactionKind,
    };

    use crate::config::{EngineConfig, ResiduePolicy};
    use crate::engine::testutil::{harness, harness_with_config, Harness};
    use crate::engine::ComplianceAction;
    use crate::storage::DosingStorage;

    // Issues a 3-day kit for order 42 / patient 7 and returns its dose uids.
    async fn issued_kit(h: &Harness) -> Vec<String> {
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(42, 7, 3, None, models::OrderStatus::Pending).await;
        let (_, doses) = h
            .engine
            .issue_kit(42, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap();
        doses.into_iter().map(|d| d.bottle_uid).collect()
    }

    #[tokio::test]
    async fn residue_over_threshold_holds_even_on_ok_outcome() {
        let h = harness(); // threshold 1.0 ml
        let uids = issued_kit(&h).await;

        let (inspection, action) = h
            .engine
            .process_return(&uids[0], true, 2.0, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap();

        assert_eq!(inspection.outcome, InspectionOutcome::Ok);
        assert_eq!(action, ComplianceAction::HoldCreated);
        let holds = h.storage.open_holds_for_patient(7).await.unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].reason_code, HoldReason::ExcessiveResidue);
    }

    #[tokio::test]
    async fn suspected_diversion_requires_a_counselor() {
        let h = harness();
        let uids = issued_kit(&h).await;

        let (_, action) = h
            .engine
            .process_return(
                &uids[0],
                false,
                0.0,
                "seal torn",
                InspectionOutcome::DiversionSuspected,
                "insp.lee",
            )
            .await
            .unwrap();

        assert_eq!(action, ComplianceAction::HoldCreated);
        let holds = h.storage.open_holds_for_patient(7).await.unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].reason_code, HoldReason::SuspectedDiversion);
        assert!(holds[0].requires_counselor);
    }

    #[tokio::test]
    async fn both_triggers_fire_independently() {
        let h = harness();
        let uids = issued_kit(&h).await;

        h.engine
            .process_return(&uids[0], true, 5.0, "", InspectionOutcome::Concern, "insp.lee")
            .await
            .unwrap();

        let mut reasons: Vec<HoldReason> = h
            .storage
            .open_holds_for_patient(7)
            .await
            .unwrap()
            .iter()
            .map(|hold| hold.reason_code)
            .collect();
        reasons.sort_by_key(|r| format!("{:?}", r));
        assert_eq!(
            reasons,
            vec![HoldReason::ExcessiveResidue, HoldReason::ReturnConcern]
        );
    }

    #[tokio::test]
    async fn clean_return_creates_no_hold() {
        let h = harness();
        let uids = issued_kit(&h).await;

        let (_, action) = h
            .engine
            .process_return(&uids[0], true, 0.5, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap();

        assert_eq!(action, ComplianceAction::None);
        assert!(h.storage.open_holds_for_patient(7).await.unwrap().is_empty());
        let dose = h
            .storage
            .dose_by_bottle_uid(&uids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dose.status, DoseStatus::Returned);
    }

    #[tokio::test]
    async fn second_return_of_the_same_bottle_is_rejected() {
        let h = harness();
        let uids = issued_kit(&h).await;

        h.engine
            .process_return(&uids[0], true, 0.5, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap();
        let ledger_before = h.storage.ledger_for_bottle("B1").await.unwrap().len();

        let err = h
            .engine
            .process_return(&uids[0], true, 0.5, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap_err();

        assert!(matches!(err, DosingError::AlreadyReturned(_)));
        assert_eq!(
            h.storage.ledger_for_bottle("B1").await.unwrap().len(),
            ledger_before
        );
    }

    #[tokio::test]
    async fn unknown_bottle_uid_is_not_found() {
        let h = harness();
        let err = h
            .engine
            .process_return("TH-0-0-99", true, 0.0, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap_err();
        assert!(matches!(err, DosingError::DoseNotFound(_)));
    }

    #[tokio::test]
    async fn blocking_hold_signal_surfaces_after_abnormal_return() {
        let h = harness();
        let uids = issued_kit(&h).await;
        assert!(h.engine.blocking_holds(7).await.unwrap().is_empty());

        h.engine
            .process_return(
                &uids[0],
                false,
                0.0,
                "",
                InspectionOutcome::DiversionSuspected,
                "insp.lee",
            )
            .await
            .unwrap();

        let holds = h.engine.blocking_holds(7).await.unwrap();
        assert_eq!(holds.len(), 1);
        assert!(holds[0].requires_counselor);
    }

    #[tokio::test]
    async fn write_off_policy_debits_the_source_bottle() {
        let h = harness();
        let uids = issued_kit(&h).await;
        let before = h
            .storage
            .get_bottle("B1")
            .await
            .unwrap()
            .unwrap()
            .current_volume_ml;

        h.engine
            .process_return(&uids[0], true, 0.8, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap();

        let bottle = h.storage.get_bottle("B1").await.unwrap().unwrap();
        assert!((bottle.current_volume_ml - (before - 0.8)).abs() < 1e-9);
        let returns: Vec<_> = h
            .storage
            .ledger_for_bottle("B1")
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Return)
            .collect();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].qty_ml, -0.8);
        h.assert_ledger_reconciles("B1").await;
    }

    #[tokio::test]
    async fn restock_policy_credits_the_source_bottle() {
        let config = EngineConfig {
            residue_policy: ResiduePolicy::Restock,
            ..EngineConfig::default()
        };
        let h = harness_with_config(config);
        let uids = issued_kit(&h).await;
        let before = h
            .storage
            .get_bottle("B1")
            .await
            .unwrap()
            .unwrap()
            .current_volume_ml;

        h.engine
            .process_return(&uids[0], true, 0.8, "", InspectionOutcome::Ok, "insp.lee")
            .await
            .unwrap();

        let bottle = h.storage.get_bottle("B1").await.unwrap().unwrap();
        assert!((bottle.current_volume_ml - (before + 0.8)).abs() < 1e-9);
        h.assert_ledger_reconciles("B1").await;
    }
}
