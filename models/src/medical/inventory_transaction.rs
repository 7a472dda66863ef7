// inventory_transaction.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Dispense,
    Return,
    Adjustment,
}

/// Append-only record of one volume movement against a bottle. `qty_ml` is
/// signed and always equals the delta applied to the bottle's current volume
/// in the same storage operation, which is what keeps the ledger and the
/// bottle reconcilable at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: i32,
    pub bottle_id: String,
    pub kind: TransactionKind,
    pub qty_ml: f64,
    pub reason: String,
    pub actor: String,
    pub dose_event_id: Option<i32>,
    pub take_home_dose_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl InventoryTransaction {
    pub fn dispense(bottle_id: &str, qty_ml: f64, actor: &str, dose_event_id: i32) -> Self {
        InventoryTransaction {
            id: 0,
            bottle_id: bottle_id.to_string(),
            kind: TransactionKind::Dispense,
            qty_ml,
            reason: "in-clinic dispense".to_string(),
            actor: actor.to_string(),
            dose_event_id: Some(dose_event_id),
            take_home_dose_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn kit_fill(bottle_id: &str, qty_ml: f64, actor: &str, take_home_dose_id: i32) -> Self {
        InventoryTransaction {
            id: 0,
            bottle_id: bottle_id.to_string(),
            kind: TransactionKind::Dispense,
            qty_ml,
            reason: "take-home kit fill".to_string(),
            actor: actor.to_string(),
            dose_event_id: None,
            take_home_dose_id: Some(take_home_dose_id),
            timestamp: Utc::now(),
        }
    }

    pub fn take_home_return(
        bottle_id: &str,
        qty_ml: f64,
        actor: &str,
        take_home_dose_id: i32,
        reason: &str,
    ) -> Self {
        InventoryTransaction {
            id: 0,
            bottle_id: bottle_id.to_string(),
            kind: TransactionKind::Return,
            qty_ml,
            reason: reason.to_string(),
            actor: actor.to_string(),
            dose_event_id: None,
            take_home_dose_id: Some(take_home_dose_id),
            timestamp: Utc::now(),
        }
    }

    pub fn adjustment(bottle_id: &str, qty_ml: f64, actor: &str, reason: &str) -> Self {
        InventoryTransaction {
            id: 0,
            bottle_id: bottle_id.to_string(),
            kind: TransactionKind::Adjustment,
            qty_ml,
            reason: reason.to_string(),
            actor: actor.to_string(),
            dose_event_id: None,
            take_home_dose_id: None,
            timestamp: Utc::now(),
        }
    }
}
