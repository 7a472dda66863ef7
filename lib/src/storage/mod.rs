// lib/src/storage/mod.rs

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{
    AuditEntry, Bottle, ComplianceHold, DeviceEvent, DoseEvent, DoseOutcome, DosingResult,
    InventoryTransaction, ReturnInspection, TakeHomeDose, TakeHomeKit, TakeHomeOrder,
};

pub use memory::InMemoryDosingStorage;

/// Persistence contract for the dosing engine. Every implementation must
/// keep the bottle volume and the inventory ledger consistent: a ledger
/// entry is only ever written together with the volume delta it describes.
#[async_trait]
pub trait DosingStorage: Send + Sync + std::fmt::Debug {
    // take-home orders
    async fn get_order(&self, order_id: i32) -> DosingResult<Option<TakeHomeOrder>>;
    async fn put_order(&self, order: TakeHomeOrder) -> DosingResult<()>;
    async fn mark_order_active(&self, order_id: i32) -> DosingResult<()>;

    // kits
    async fn insert_kit(&self, kit: TakeHomeKit) -> DosingResult<TakeHomeKit>;
    async fn get_kit(&self, kit_id: i32) -> DosingResult<Option<TakeHomeKit>>;
    async fn kits_for_order(&self, order_id: i32) -> DosingResult<Vec<TakeHomeKit>>;
    async fn mark_kit_voided(&self, kit_id: i32) -> DosingResult<()>;

    // doses
    /// All-or-nothing: either every dose is inserted or none is. Duplicate
    /// bottle/seal uids (within the batch or against stored doses) reject
    /// the whole batch.
    async fn bulk_insert_doses(&self, doses: Vec<TakeHomeDose>) -> DosingResult<Vec<TakeHomeDose>>;
    async fn delete_doses_for_kit(&self, kit_id: i32) -> DosingResult<()>;
    async fn dose_by_bottle_uid(&self, bottle_uid: &str) -> DosingResult<Option<TakeHomeDose>>;
    async fn doses_for_kit(&self, kit_id: i32) -> DosingResult<Vec<TakeHomeDose>>;
    async fn mark_dose_returned(&self, dose_id: i32) -> DosingResult<()>;

    // dose events
    async fn insert_dose_event(&self, event: DoseEvent) -> DosingResult<DoseEvent>;
    async fn get_dose_event(&self, event_id: i32) -> DosingResult<Option<DoseEvent>>;
    /// Records the dispense results on a pending event. Rejects an event
    /// that already has an outcome: dose events are completed exactly once.
    async fn complete_dose_event(
        &self,
        event_id: i32,
        dispensed_ml: f64,
        outcome: DoseOutcome,
        device_events: Vec<DeviceEvent>,
        signature_hash: String,
    ) -> DosingResult<DoseEvent>;
    async fn pending_dose_events_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DosingResult<Vec<DoseEvent>>;

    // bottles and the inventory ledger
    async fn get_bottle(&self, serial: &str) -> DosingResult<Option<Bottle>>;
    async fn put_bottle(&self, bottle: Bottle) -> DosingResult<()>;
    /// Applies `tx.qty_ml` to the bottle named by `tx.bottle_id` and appends
    /// the ledger entry in one critical section. When `expected_volume` is
    /// given the update is conditional on the bottle still holding exactly
    /// that volume, which surfaces racing writers instead of losing their
    /// updates. A result below zero is a hard error and writes nothing.
    async fn apply_volume_change(
        &self,
        expected_volume: Option<f64>,
        tx: InventoryTransaction,
    ) -> DosingResult<Bottle>;
    async fn ledger_for_bottle(&self, serial: &str) -> DosingResult<Vec<InventoryTransaction>>;

    // compliance holds
    async fn insert_hold(&self, hold: ComplianceHold) -> DosingResult<ComplianceHold>;
    async fn open_holds_for_patient(&self, patient_id: i32) -> DosingResult<Vec<ComplianceHold>>;

    // return inspections
    async fn insert_inspection(&self, inspection: ReturnInspection)
        -> DosingResult<ReturnInspection>;

    // audit trail
    async fn append_audit(&self, entry: AuditEntry) -> DosingResult<AuditEntry>;
    async fn audit_trail(&self) -> DosingResult<Vec<AuditEntry>>;
}
