// take_home_kit.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KitStatus {
    Issued,
    Voided,
}

/// One physical package of sealed daily doses produced by a single issuance.
/// `source_bottle` is the inventory bottle the doses were drawn from, so
/// return intake can post ledger movements against a concrete bottle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeHomeKit {
    pub id: i32,
    pub take_home_order_id: i32,
    pub issue_time: DateTime<Utc>,
    pub issued_by: String,
    pub seal_batch: String,
    pub source_bottle: String,
    pub status: KitStatus,
}

impl TakeHomeKit {
    pub fn new(
        take_home_order_id: i32,
        issued_by: &str,
        seal_batch: &str,
        source_bottle: &str,
    ) -> Self {
        TakeHomeKit {
            id: 0,
            take_home_order_id,
            issue_time: Utc::now(),
            issued_by: issued_by.to_string(),
            seal_batch: seal_batch.to_string(),
            source_bottle: source_bottle.to_string(),
            status: KitStatus::Issued,
        }
    }
}
