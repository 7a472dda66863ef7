// dose_event.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device_event::DeviceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseOutcome {
    Success,
    Aborted,
}

/// Record of a single in-clinic dispensing action. Created in pending shape
/// (outcome `None`) before the device is commanded, so a crash mid-dispense
/// still leaves an auditable row; completed exactly once with the observed
/// results and never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: i32,
    pub patient_id: i32,
    pub requested_ml: f64,
    pub bottle_id: String,
    pub device_id: String,
    pub witness_signature: String,
    pub dispensed_ml: f64,
    pub outcome: Option<DoseOutcome>,
    pub device_events: Vec<DeviceEvent>,
    pub signature_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DoseEvent {
    pub fn pending(
        patient_id: i32,
        requested_ml: f64,
        bottle_id: &str,
        device_id: &str,
        witness_signature: &str,
    ) -> Self {
        DoseEvent {
            id: 0,
            patient_id,
            requested_ml,
            bottle_id: bottle_id.to_string(),
            device_id: device_id.to_string(),
            witness_signature: witness_signature.to_string(),
            dispensed_ml: 0.0,
            outcome: None,
            device_events: Vec::new(),
            signature_hash: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }
}
