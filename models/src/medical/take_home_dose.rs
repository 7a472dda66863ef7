// take_home_dose.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Sealed,
    Returned,
}

/// One day's pre-measured container within a kit. The bottle and seal uids
/// encode order/kit/day so a returned container is auditable without a
/// database lookup. `sealed -> returned` is the only legal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeHomeDose {
    pub id: i32,
    pub kit_id: i32,
    pub day_date: NaiveDate,
    pub dose_mg: f64,
    pub dose_ml: f64,
    pub bottle_uid: String,
    pub seal_uid: String,
    pub status: DoseStatus,
}

impl TakeHomeDose {
    pub fn sealed(
        kit_id: i32,
        day_date: NaiveDate,
        dose_mg: f64,
        dose_ml: f64,
        bottle_uid: String,
        seal_uid: String,
    ) -> Self {
        TakeHomeDose {
            id: 0,
            kit_id,
            day_date,
            dose_mg,
            dose_ml,
            bottle_uid,
            seal_uid,
            status: DoseStatus::Sealed,
        }
    }

    /// `TH-{order}-{kit}-{day}`, day 1-based and zero-padded to two digits.
    pub fn bottle_uid_for(order_id: i32, kit_id: i32, day: u32) -> String {
        format!("TH-{}-{}-{:02}", order_id, kit_id, day)
    }

    /// `SEAL-{kit}-{day}`, same day numbering as the bottle uid.
    pub fn seal_uid_for(kit_id: i32, day: u32) -> String {
        format!("SEAL-{}-{:02}", kit_id, day)
    }
}

#[cfg(test)]
mod tests {
    use super::TakeHomeDose;

    #[test]
    fn uids_encode_order_kit_and_day() {
        assert_eq!(TakeHomeDose::bottle_uid_for(42, 9, 1), "TH-42-9-01");
        assert_eq!(TakeHomeDose::bottle_uid_for(42, 9, 12), "TH-42-9-12");
        assert_eq!(TakeHomeDose::seal_uid_for(9, 3), "SEAL-9-03");
    }
}
