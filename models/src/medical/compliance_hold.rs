// compliance_hold.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    SuspectedDiversion,
    ReturnConcern,
    ExcessiveResidue,
}

/// A flag blocking further dosing for a patient pending review. Created by
/// return intake when findings are abnormal; cleared only by an authorized
/// external workflow, never by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceHold {
    pub id: i32,
    pub patient_id: i32,
    pub reason_code: HoldReason,
    pub requires_counselor: bool,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub cleared_by: Option<String>,
}

impl ComplianceHold {
    pub fn open(patient_id: i32, reason_code: HoldReason, requires_counselor: bool, notes: &str) -> Self {
        ComplianceHold {
            id: 0,
            patient_id,
            reason_code,
            requires_counselor,
            notes: notes.to_string(),
            created_at: Utc::now(),
            cleared_at: None,
            cleared_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.cleared_at.is_none()
    }
}
