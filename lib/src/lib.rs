// lib/src/lib.rs

pub mod config;
pub mod device;
pub mod directory;
pub mod engine;
pub mod rules;
pub mod storage;

// Re-export the shared domain types so downstream crates can depend on
// `lib` alone for engine work.
pub use models::{DosingError, DosingResult};

pub use crate::config::{load_engine_config, EngineConfig, ResiduePolicy};
pub use crate::device::{
    DeviceStatus, DispenseCommand, DispenseReport, DispensingDeviceGateway, SerialLinkGateway,
    SimulatedDeviceGateway,
};
pub use crate::directory::{InMemoryDirectory, MedicationDirectory};
pub use crate::engine::{run_reconciliation_sweep, ComplianceAction, DosingEngine};
pub use crate::rules::{RuleStore, StaticRuleStore};
pub use crate::storage::{DosingStorage, InMemoryDosingStorage};
