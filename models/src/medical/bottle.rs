// bottle.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remaining volume of a medication source container, identified by serial
/// number. Volume must never go negative; an update that would drive it
/// negative is a hard error, not a clamp. `initial_volume_ml` is kept so the
/// ledger reconciliation invariant is directly checkable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottle {
    pub serial_no: String,
    pub current_volume_ml: f64,
    pub initial_volume_ml: f64,
    pub updated_at: DateTime<Utc>,
}

impl Bottle {
    pub fn new(serial_no: &str, volume_ml: f64) -> Self {
        Bottle {
            serial_no: serial_no.to_string(),
            current_volume_ml: volume_ml,
            initial_volume_ml: volume_ml,
            updated_at: Utc::now(),
        }
    }
}
