pub mod audit_entry;
pub mod bottle;
pub mod compliance_hold;
pub mod device_event;
pub mod dose_event;
pub mod inventory_transaction;
pub mod medication_order;
pub mod return_inspection;
pub mod take_home_dose;
pub mod take_home_kit;
pub mod take_home_order;

pub use audit_entry::AuditEntry;
pub use bottle::Bottle;
pub use compliance_hold::{ComplianceHold, HoldReason};
pub use device_event::DeviceEvent;
pub use dose_event::{DoseEvent, DoseOutcome};
pub use inventory_transaction::{InventoryTransaction, TransactionKind};
pub use medication_order::MedicationOrder;
pub use return_inspection::{InspectionOutcome, ReturnInspection};
pub use take_home_dose::{DoseStatus, TakeHomeDose};
pub use take_home_kit::{KitStatus, TakeHomeKit};
pub use take_home_order::{OrderStatus, RiskLevel, TakeHomeOrder};
