// audit_entry.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Append-only record of a privileged action for regulatory traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i32,
    pub action: String,
    pub entity_id: String,
    pub actor: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: &str, entity_id: String, actor: &str, details: Value) -> Self {
        AuditEntry {
            id: 0,
            action: action.to_string(),
            entity_id,
            actor: actor.to_string(),
            details,
            timestamp: Utc::now(),
        }
    }
}
