// medication_order.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Read-only row from the patient/medication directory: the active daily
/// dose for a patient over an effective window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationOrder {
    pub patient_id: i32,
    pub daily_dose_mg: f64,
    pub effective: NaiveDate,
    pub expires: Option<NaiveDate>,
}

impl MedicationOrder {
    pub fn covers(&self, as_of: NaiveDate) -> bool {
        self.effective <= as_of && self.expires.map(|e| e >= as_of).unwrap_or(true)
    }
}
