// lib/src/engine/mod.rs

pub mod dose_execution;
pub mod kit_issuance;
mod locks;
pub mod reconciliation;
pub mod return_intake;

use std::sync::Arc;

use log::warn;
use models::{AuditEntry, DoseEvent, DosingError, DosingResult, InventoryTransaction};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::device::DispensingDeviceGateway;
use crate::directory::MedicationDirectory;
use crate::rules::RuleStore;
use crate::storage::DosingStorage;

use locks::LockRegistry;

pub use reconciliation::run_reconciliation_sweep;
pub use return_intake::ComplianceAction;

/// Coordinates dose execution, kit issuance and return intake over the
/// storage engine, the dispensing device and the external collaborator
/// contracts. All public operations take the acting staff identity
/// explicitly; there is no implicit current user.
#[derive(Debug)]
pub struct DosingEngine {
    storage: Arc<dyn DosingStorage>,
    device: Arc<dyn DispensingDeviceGateway>,
    directory: Arc<dyn MedicationDirectory>,
    rules: Arc<dyn RuleStore>,
    config: EngineConfig,
    bottle_locks: LockRegistry,
    order_locks: LockRegistry,
}

impl DosingEngine {
    pub fn new(
        storage: Arc<dyn DosingStorage>,
        device: Arc<dyn DispensingDeviceGateway>,
        directory: Arc<dyn MedicationDirectory>,
        rules: Arc<dyn RuleStore>,
        config: EngineConfig,
    ) -> Self {
        DosingEngine {
            storage,
            device,
            directory,
            rules,
            config,
            bottle_locks: LockRegistry::new(),
            order_locks: LockRegistry::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn DosingStorage> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Audit is supplementary to the ledger of record: a failed append is
    // logged and swallowed, never fatal to the primary operation.
    pub(crate) async fn record_audit(
        &self,
        action: &str,
        entity_id: String,
        actor: &str,
        details: Value,
    ) {
        let entry = AuditEntry::new(action, entity_id, actor, details);
        if let Err(e) = self.storage.append_audit(entry).await {
            warn!("audit append failed for {}: {}", action, e);
        }
    }

    /// Open holds that should block new dispenses for a patient. This engine
    /// only emits the signal; refusing to dose is the dosing workflow's job.
    pub async fn blocking_holds(
        &self,
        patient_id: i32,
    ) -> DosingResult<Vec<models::ComplianceHold>> {
        let holds = self.storage.open_holds_for_patient(patient_id).await?;
        Ok(holds.into_iter().filter(|h| h.requires_counselor).collect())
    }

    /// Ledger-write-then-volume-update for a successful dispense, serialized
    /// per bottle. Shared by the live path and the reconciliation sweep.
    pub(crate) async fn debit_bottle_for_event(
        &self,
        event: &DoseEvent,
        actor: &str,
    ) -> DosingResult<()> {
        let lock = self.bottle_locks.handle(&event.bottle_id);
        let _guard = lock.lock().await;
        let bottle = self
            .storage
            .get_bottle(&event.bottle_id)
            .await?
            .ok_or_else(|| DosingError::BottleNotFound(event.bottle_id.clone()))?;
        let tx =
            InventoryTransaction::dispense(&event.bottle_id, -event.dispensed_ml, actor, event.id);
        self.storage
            .apply_volume_change(Some(bottle.current_volume_ml), tx)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use models::{Bottle, MedicationOrder, OrderStatus, RiskLevel, TakeHomeOrder};

    use crate::config::EngineConfig;
    use crate::device::SimulatedDeviceGateway;
    use crate::directory::InMemoryDirectory;
    use crate::rules::StaticRuleStore;
    use crate::storage::{DosingStorage, InMemoryDosingStorage};

    use super::DosingEngine;

    pub(crate) struct Harness {
        pub engine: DosingEngine,
        pub storage: Arc<InMemoryDosingStorage>,
        pub device: Arc<SimulatedDeviceGateway>,
        pub directory: Arc<InMemoryDirectory>,
    }

    pub(crate) fn harness() -> Harness {
        harness_with_config(EngineConfig::default())
    }

    pub(crate) fn harness_with_config(config: EngineConfig) -> Harness {
        let storage = Arc::new(InMemoryDosingStorage::new());
        let device = Arc::new(SimulatedDeviceGateway::new("sim-01").with_bottle("B1"));
        let directory = Arc::new(InMemoryDirectory::new());
        let rules = Arc::new(StaticRuleStore::from_config(&config));
        let engine = DosingEngine::new(
            storage.clone(),
            device.clone(),
            directory.clone(),
            rules,
            config,
        );
        Harness {
            engine,
            storage,
            device,
            directory,
        }
    }

    impl Harness {
        pub(crate) async fn seed_bottle(&self, serial: &str, volume_ml: f64) {
            self.storage
                .put_bottle(Bottle::new(serial, volume_ml))
                .await
                .unwrap();
        }

        pub(crate) async fn seed_order(
            &self,
            id: i32,
            patient_id: i32,
            days: u32,
            start_date: Option<NaiveDate>,
            status: OrderStatus,
        ) {
            self.storage
                .put_order(TakeHomeOrder {
                    id,
                    patient_id,
                    days,
                    start_date,
                    risk_level: RiskLevel::Low,
                    status,
                })
                .await
                .unwrap();
        }

        pub(crate) fn seed_daily_dose(&self, patient_id: i32, daily_dose_mg: f64) {
            self.directory.upsert_order(MedicationOrder {
                patient_id,
                daily_dose_mg,
                effective: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
                expires: None,
            });
        }

        pub(crate) async fn assert_ledger_reconciles(&self, serial: &str) {
            let bottle = self.storage.get_bottle(serial).await.unwrap().unwrap();
            let sum: f64 = self
                .storage
                .ledger_for_bottle(serial)
                .await
                .unwrap()
                .iter()
                .map(|t| t.qty_ml)
                .sum();
            assert!(
                (bottle.initial_volume_ml - bottle.current_volume_ml + sum).abs() < 1e-9,
                "ledger does not reconcile for {}: initial {} current {} sum {}",
                serial,
                bottle.initial_volume_ml,
                bottle.current_volume_ml,
                sum
            );
        }
    }
}
