// return_inspection.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionOutcome {
    Ok,
    Concern,
    DiversionSuspected,
}

/// Inspector findings for one physically returned container. Created exactly
/// once per return and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnInspection {
    pub id: i32,
    pub bottle_uid: String,
    pub returned_time: DateTime<Utc>,
    pub inspector_id: String,
    pub seal_intact: bool,
    pub residue_ml_est: f64,
    pub notes: String,
    pub outcome: InspectionOutcome,
}

impl ReturnInspection {
    pub fn new(
        bottle_uid: &str,
        inspector_id: &str,
        seal_intact: bool,
        residue_ml_est: f64,
        notes: &str,
        outcome: InspectionOutcome,
    ) -> Self {
        ReturnInspection {
            id: 0,
            bottle_uid: bottle_uid.to_string(),
            returned_time: Utc::now(),
            inspector_id: inspector_id.to_string(),
            seal_intact,
            residue_ml_est,
            notes: notes.to_string(),
            outcome,
        }
    }
}
