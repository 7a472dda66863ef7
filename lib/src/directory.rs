// lib/src/directory.rs

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use models::{DosingError, DosingResult, MedicationOrder};

/// Read-only view of the patient/medication directory. The directory itself
/// (patient CRUD, prescribing) lives outside this engine; dosing only needs
/// the active daily dose for a patient on a given date.
#[async_trait]
pub trait MedicationDirectory: Send + Sync + std::fmt::Debug {
    async fn active_daily_dose_mg(
        &self,
        patient_id: i32,
        as_of: NaiveDate,
    ) -> DosingResult<Option<f64>>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    orders: RwLock<Vec<MedicationOrder>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_order(&self, order: MedicationOrder) {
        let mut orders = self.orders.write().expect("directory lock poisoned");
        orders.retain(|o| o.patient_id != order.patient_id || o.effective != order.effective);
        orders.push(order);
    }
}

#[async_trait]
impl MedicationDirectory for InMemoryDirectory {
    async fn active_daily_dose_mg(
        &self,
        patient_id: i32,
        as_of: NaiveDate,
    ) -> DosingResult<Option<f64>> {
        let orders = self
            .orders
            .read()
            .map_err(|e| DosingError::LockError(e.to_string()))?;
        // Most recent effective order covering the date wins.
        let dose = orders
            .iter()
            .filter(|o| o.patient_id == patient_id && o.covers(as_of))
            .max_by_key(|o| o.effective)
            .map(|o| o.daily_dose_mg);
        Ok(dose)
    }
}
