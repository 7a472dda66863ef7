// take_home_order.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

/// A physician-authorized plan to send a patient home with `days` days of
/// medication. A kit may be issued only while the order is not closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeHomeOrder {
    pub id: i32,
    pub patient_id: i32,
    pub days: u32,
    pub start_date: Option<NaiveDate>,
    pub risk_level: RiskLevel,
    pub status: OrderStatus,
}
