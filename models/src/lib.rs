// models/src/lib.rs

pub mod errors;
pub mod medical;

pub use errors::{DosingError, DosingResult};
pub use medical::{
    AuditEntry, Bottle, ComplianceHold, DeviceEvent, DoseEvent, DoseOutcome, DoseStatus,
    HoldReason, InspectionOutcome, InventoryTransaction, KitStatus, MedicationOrder, OrderStatus,
    ReturnInspection, RiskLevel, TakeHomeDose, TakeHomeKit, TakeHomeOrder, TransactionKind,
};
