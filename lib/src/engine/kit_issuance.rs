// lib/src/engine/kit_issuance.rs

use chrono::Utc;
use log::{info, warn};
use models::{
    DosingError, DosingResult, InventoryTransaction, KitStatus, OrderStatus, TakeHomeDose,
    TakeHomeKit,
};
use serde_json::json;

use super::DosingEngine;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl DosingEngine {
    /// Issues one sealed take-home kit for an order: one dose row per day,
    /// deterministic bottle/seal uids, the source bottle debited per dose.
    ///
    /// Runs under a per-order lock so two racing issuance calls cannot
    /// produce overlapping active kits; a newly issued kit supersedes any
    /// prior issued kit of the same order. Doses are fully persisted before
    /// the order is marked active.
    pub async fn issue_kit(
        &self,
        order_id: i32,
        issued_by: &str,
        seal_batch: Option<String>,
        source_bottle: Option<String>,
    ) -> DosingResult<(TakeHomeKit, Vec<TakeHomeDose>)> {
        if issued_by.trim().is_empty() {
            return Err(DosingError::InvalidData("issued_by must not be empty".into()));
        }

        let order_lock = self.order_locks.handle(&order_id.to_string());
        let _order_guard = order_lock.lock().await;

        let order = self
            .storage
            .get_order(order_id)
            .await?
            .ok_or(DosingError::OrderNotFound(order_id))?;
        if order.status == OrderStatus::Closed {
            return Err(DosingError::OrderClosed(order_id));
        }

        let source_serial = match source_bottle {
            Some(serial) => serial,
            None => self
                .device
                .status()
                .await
                .bottle_serial
                .ok_or_else(|| {
                    DosingError::InvalidData("no source bottle available for kit fill".into())
                })?,
        };
        self.storage
            .get_bottle(&source_serial)
            .await?
            .ok_or_else(|| DosingError::BottleNotFound(source_serial.clone()))?;

        let start = order.start_date.unwrap_or_else(|| Utc::now().date_naive());
        let daily_dose_mg = self
            .directory
            .active_daily_dose_mg(order.patient_id, start)
            .await?
            .ok_or_else(|| {
                DosingError::InvalidData(format!(
                    "patient {} has no active medication order",
                    order.patient_id
                ))
            })?;
        let concentration = self.rules.numeric(crate::rules::CONCENTRATION_MG_PER_ML)?;
        if concentration <= 0.0 {
            return Err(DosingError::ConfigError(format!(
                "concentration must be positive, got {}",
                concentration
            )));
        }
        let dose_ml = round2(daily_dose_mg / concentration);

        let seal_batch =
            seal_batch.unwrap_or_else(|| format!("SB-{}", start.format("%Y%m%d")));
        let kit = self
            .storage
            .insert_kit(TakeHomeKit::new(
                order_id,
                issued_by,
                &seal_batch,
                &source_serial,
            ))
            .await
            .map_err(|e| DosingError::KitIssuanceFailed(e.to_string()))?;

        let mut batch = Vec::with_capacity(order.days as usize);
        for day in 0..order.days {
            let day_date = start + chrono::Duration::days(i64::from(day));
            batch.push(TakeHomeDose::sealed(
                kit.id,
                day_date,
                daily_dose_mg,
                dose_ml,
                TakeHomeDose::bottle_uid_for(order_id, kit.id, day + 1),
                TakeHomeDose::seal_uid_for(kit.id, day + 1),
            ));
        }

        let doses = match self.storage.bulk_insert_doses(batch).await {
            Ok(doses) => doses,
            Err(e) => {
                let _ = self.storage.mark_kit_voided(kit.id).await;
                return Err(DosingError::KitIssuanceFailed(e.to_string()));
            }
        };

        if let Err(e) = self.debit_source_bottle(&kit, &doses, issued_by).await {
            let _ = self.storage.delete_doses_for_kit(kit.id).await;
            let _ = self.storage.mark_kit_voided(kit.id).await;
            return Err(DosingError::KitIssuanceFailed(e.to_string()));
        }

        // Supersede earlier kits of this order; their sealed doses stay
        // returnable because the physical containers are already out.
        for prior in self.storage.kits_for_order(order_id).await? {
            if prior.id != kit.id && prior.status == KitStatus::Issued {
                info!("kit {} superseded by kit {} on order {}", prior.id, kit.id, order_id);
                self.storage.mark_kit_voided(prior.id).await?;
            }
        }

        self.storage
            .mark_order_active(order_id)
            .await
            .map_err(|e| DosingError::KitIssuanceFailed(e.to_string()))?;

        self.record_audit(
            "takehome.kit.issue",
            kit.id.to_string(),
            issued_by,
            json!({
                "order_id": order_id,
                "dose_count": doses.len(),
                "source_bottle": source_serial,
            }),
        )
        .await;

        Ok((kit, doses))
    }

    // One dispense movement per dose against the kit's source bottle. The
    // total is checked upfront under the bottle lock; a mid-loop failure is
    // unwound with a compensating adjustment.
    async fn debit_source_bottle(
        &self,
        kit: &TakeHomeKit,
        doses: &[TakeHomeDose],
        actor: &str,
    ) -> DosingResult<()> {
        if doses.is_empty() {
            return Ok(());
        }
        let total: f64 = doses.iter().map(|d| d.dose_ml).sum();

        let lock = self.bottle_locks.handle(&kit.source_bottle);
        let _guard = lock.lock().await;
        let bottle = self
            .storage
            .get_bottle(&kit.source_bottle)
            .await?
            .ok_or_else(|| DosingError::BottleNotFound(kit.source_bottle.clone()))?;
        if bottle.current_volume_ml + 1e-9 < total {
            return Err(DosingError::InsufficientVolume {
                serial: bottle.serial_no,
                available: bottle.current_volume_ml,
                delta: -total,
            });
        }

        let mut expected = bottle.current_volume_ml;
        let mut applied = 0.0;
        for dose in doses {
            let tx =
                InventoryTransaction::kit_fill(&kit.source_bottle, -dose.dose_ml, actor, dose.id);
            match self.storage.apply_volume_change(Some(expected), tx).await {
                Ok(updated) => {
                    expected = updated.current_volume_ml;
                    applied += dose.dose_ml;
                }
                Err(e) => {
                    warn!(
                        "kit {} fill failed after {} ml, unwinding: {}",
                        kit.id, applied, e
                    );
                    if applied > 0.0 {
                        let reversal = InventoryTransaction::adjustment(
                            &kit.source_bottle,
                            applied,
                            actor,
                            "kit issuance unwound",
                        );
                        self.storage.apply_volume_change(None, reversal).await?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;
    use models::{DoseStatus, DosingError, KitStatus, OrderStatus, TransactionKind};

    use crate::engine::testutil::harness;
    use crate::storage::DosingStorage;

    #[tokio::test]
    async fn issues_one_sealed_dose_per_day() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(
            42,
            7,
            3,
            NaiveDate::from_ymd_opt(2025, 1, 1),
            OrderStatus::Pending,
        )
        .await;

        let (kit, doses) = h
            .engine
            .issue_kit(42, "nurse.ok", Some("LOT-7".into()), Some("B1".into()))
            .await
            .unwrap();

        assert_eq!(kit.status, KitStatus::Issued);
        assert_eq!(kit.seal_batch, "LOT-7");
        assert_eq!(doses.len(), 3);

        let mut bottle_uids = HashSet::new();
        let mut seal_uids = HashSet::new();
        for (i, dose) in doses.iter().enumerate() {
            assert_eq!(dose.status, DoseStatus::Sealed);
            assert_eq!(
                dose.day_date,
                NaiveDate::from_ymd_opt(2025, 1, 1 + i as u32).unwrap()
            );
            assert_eq!(dose.dose_mg, 80.0);
            assert_eq!(dose.dose_ml, 8.0); // 80 mg at 10 mg/ml
            assert_eq!(
                dose.bottle_uid,
                format!("TH-42-{}-{:02}", kit.id, i + 1)
            );
            assert!(bottle_uids.insert(dose.bottle_uid.clone()));
            assert!(seal_uids.insert(dose.seal_uid.clone()));
        }

        let order = h.storage.get_order(42).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Active);

        // The source bottle was debited once per dose.
        let ledger = h.storage.ledger_for_bottle("B1").await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger
            .iter()
            .all(|t| t.kind == TransactionKind::Dispense && t.qty_ml == -8.0));
        assert_eq!(
            h.storage.get_bottle("B1").await.unwrap().unwrap().current_volume_ml,
            476.0
        );
        h.assert_ledger_reconciles("B1").await;

        let audit = h.storage.audit_trail().await.unwrap();
        assert!(audit.iter().any(|e| e.action == "takehome.kit.issue"));
    }

    #[tokio::test]
    async fn closed_order_is_rejected_with_no_rows() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(7, 7, 3, None, OrderStatus::Closed).await;

        let err = h
            .engine
            .issue_kit(7, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, DosingError::OrderClosed(7)));
        assert!(h.storage.kits_for_order(7).await.unwrap().is_empty());
        assert!(h.storage.ledger_for_bottle("B1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let h = harness();
        let err = h
            .engine
            .issue_kit(999, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DosingError::OrderNotFound(999)));
    }

    #[tokio::test]
    async fn zero_day_order_yields_a_valid_empty_kit() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(42, 7, 0, None, OrderStatus::Pending).await;

        let (kit, doses) = h
            .engine
            .issue_kit(42, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap();

        assert_eq!(kit.status, KitStatus::Issued);
        assert!(doses.is_empty());
        assert!(h.storage.ledger_for_bottle("B1").await.unwrap().is_empty());
        let order = h.storage.get_order(42).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn reissuance_supersedes_the_prior_kit() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(42, 7, 2, None, OrderStatus::Pending).await;

        let (first, _) = h
            .engine
            .issue_kit(42, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap();
        let (second, _) = h
            .engine
            .issue_kit(42, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap();

        let first = h.storage.get_kit(first.id).await.unwrap().unwrap();
        let second = h.storage.get_kit(second.id).await.unwrap().unwrap();
        assert_eq!(first.status, KitStatus::Voided);
        assert_eq!(second.status, KitStatus::Issued);

        // Doses of the superseded kit are still out there and returnable.
        assert_eq!(h.storage.doses_for_kit(first.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn insufficient_source_volume_unwinds_the_kit() {
        let h = harness();
        h.seed_bottle("B1", 10.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(42, 7, 3, None, OrderStatus::Pending).await;

        let err = h
            .engine
            .issue_kit(42, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DosingError::KitIssuanceFailed(_)));

        let kits = h.storage.kits_for_order(42).await.unwrap();
        assert_eq!(kits.len(), 1);
        assert_eq!(kits[0].status, KitStatus::Voided);
        assert!(h.storage.doses_for_kit(kits[0].id).await.unwrap().is_empty());
        assert_eq!(
            h.storage.get_bottle("B1").await.unwrap().unwrap().current_volume_ml,
            10.0
        );
        assert!(h.storage.ledger_for_bottle("B1").await.unwrap().is_empty());
        let order = h.storage.get_order(42).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn missing_start_date_defaults_to_today() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(42, 7, 1, None, OrderStatus::Pending).await;

        let (_, doses) = h
            .engine
            .issue_kit(42, "nurse.ok", None, Some("B1".into()))
            .await
            .unwrap();
        assert_eq!(doses[0].day_date, chrono::Utc::now().date_naive());
    }

    #[tokio::test]
    async fn source_bottle_falls_back_to_the_loaded_bottle() {
        let h = harness();
        h.seed_bottle("B1", 500.0).await;
        h.seed_daily_dose(7, 80.0);
        h.seed_order(42, 7, 1, None, OrderStatus::Pending).await;

        // No explicit source bottle: the device's loaded bottle (B1) is used.
        let (kit, _) = h.engine.issue_kit(42, "nurse.ok", None, None).await.unwrap();
        assert_eq!(kit.source_bottle, "B1");
    }
}
