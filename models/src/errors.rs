// models/src/errors.rs

use std::io;

use anyhow::Error as AnyhowError;
use serde_json::Error as SerdeJsonError;
pub use thiserror::Error;

#[derive(Debug, Error)]
pub enum DosingError {
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Failed to acquire lock: {0}")]
    LockError(String),
    #[error("Invalid data provided: {0}")]
    InvalidData(String),
    #[error("An internal error occurred: {0}")]
    InternalError(String),

    #[error("take-home order {0} was not found")]
    OrderNotFound(i32),
    #[error("take-home order {0} is closed")]
    OrderClosed(i32),
    #[error("no take-home dose found for bottle {0}")]
    DoseNotFound(String),
    #[error("dose for bottle {0} was already returned")]
    AlreadyReturned(String),
    #[error("bottle {0} was not found")]
    BottleNotFound(String),

    #[error("dispensing device not ready: {0}")]
    DeviceNotReady(String),
    #[error("kit issuance failed: {0}")]
    KitIssuanceFailed(String),
    #[error("bottle {serial}: insufficient volume (have {available} ml, change {delta} ml)")]
    InsufficientVolume {
        serial: String,
        available: f64,
        delta: f64,
    },
    #[error("bottle {serial}: volume changed concurrently (expected {expected} ml, found {found} ml)")]
    VolumeConflict {
        serial: String,
        expected: f64,
        found: f64,
    },
    #[error(
        "dose event {dose_event_id} recorded ({dispensed_ml} ml dispensed) but the inventory \
         update failed; do not retry the dispense"
    )]
    PostDispenseFailure {
        dose_event_id: i32,
        dispensed_ml: f64,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] SerdeJsonError),
}

pub type DosingResult<T> = std::result::Result<T, DosingError>;

impl From<AnyhowError> for DosingError {
    fn from(err: AnyhowError) -> Self {
        DosingError::InternalError(format!("An internal error occurred: {}", err))
    }
}
