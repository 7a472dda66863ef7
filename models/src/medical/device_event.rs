// device_event.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in the ordered trail a dispensing device produces while
/// executing (or failing to execute) a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(event_type: &str, payload: Value) -> Self {
        DeviceEvent {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}
