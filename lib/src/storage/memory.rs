// lib/src/storage/memory.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use models::{
    AuditEntry, Bottle, ComplianceHold, DeviceEvent, DoseEvent, DoseOutcome, DoseStatus,
    DosingError, DosingResult, InventoryTransaction, KitStatus, OrderStatus, ReturnInspection,
    TakeHomeDose, TakeHomeKit, TakeHomeOrder,
};

use super::DosingStorage;

const VOLUME_EPSILON: f64 = 1e-9;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sequences {
    kit: i32,
    dose: i32,
    dose_event: i32,
    transaction: i32,
    hold: i32,
    inspection: i32,
    audit: i32,
}

impl Sequences {
    fn next(counter: &mut i32) -> i32 {
        *counter += 1;
        *counter
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InternalState {
    orders: BTreeMap<i32, TakeHomeOrder>,
    kits: BTreeMap<i32, TakeHomeKit>,
    doses: BTreeMap<i32, TakeHomeDose>,
    dose_ids_by_bottle_uid: HashMap<String, i32>,
    seal_uids: HashSet<String>,
    dose_events: BTreeMap<i32, DoseEvent>,
    bottles: BTreeMap<String, Bottle>,
    ledger: Vec<InventoryTransaction>,
    holds: BTreeMap<i32, ComplianceHold>,
    inspections: BTreeMap<i32, ReturnInspection>,
    audit: Vec<AuditEntry>,
    sequences: Sequences,
}

/// In-memory implementation of `DosingStorage`, optionally snapshotted to a
/// MessagePack file after each mutation so a restarted service picks up
/// where it left off.
#[derive(Debug, Clone)]
pub struct InMemoryDosingStorage {
    internal: Arc<Mutex<InternalState>>,
    path: Option<PathBuf>,
}

impl Default for InMemoryDosingStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDosingStorage {
    pub fn new() -> Self {
        InMemoryDosingStorage {
            internal: Arc::new(Mutex::new(InternalState::default())),
            path: None,
        }
    }

    pub fn new_with_path<P: Into<PathBuf>>(path: P) -> Self {
        InMemoryDosingStorage {
            internal: Arc::new(Mutex::new(InternalState::default())),
            path: Some(path.into()),
        }
    }

    /// Reloads a store previously snapshotted by `new_with_path`.
    pub fn from_msgpack_file<P: Into<PathBuf>>(path: P) -> DosingResult<Self> {
        let path = path.into();
        let f = File::open(&path).map_err(DosingError::Io)?;
        let buf = BufReader::new(f);
        let internal: InternalState = rmp_serde::from_read(buf)
            .map_err(|e| DosingError::SerializationError(format!("Failed to decode MessagePack: {}", e)))?;
        Ok(InMemoryDosingStorage {
            internal: Arc::new(Mutex::new(internal)),
            path: Some(path),
        })
    }

    fn lock(&self) -> DosingResult<MutexGuard<'_, InternalState>> {
        self.internal
            .lock()
            .map_err(|e| DosingError::LockError(e.to_string()))
    }

    // Writes the snapshot through a temp file so a crash mid-write never
    // truncates the previous snapshot.
    fn sync_internal(&self, internal: &InternalState) -> DosingResult<()> {
        if let Some(ref persist_path) = self.path {
            let temp_path = NamedTempFile::new().map_err(|e| DosingError::Io(e.into()))?;
            {
                let mut buf = BufWriter::new(temp_path.as_file());
                rmp_serde::encode::write(&mut buf, internal)
                    .map_err(|e| DosingError::SerializationError(e.to_string()))?;
            }
            temp_path
                .persist(persist_path)
                .map_err(|e| DosingError::Io(e.error))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DosingStorage for InMemoryDosingStorage {
    async fn get_order(&self, order_id: i32) -> DosingResult<Option<TakeHomeOrder>> {
        Ok(self.lock()?.orders.get(&order_id).cloned())
    }

    async fn put_order(&self, order: TakeHomeOrder) -> DosingResult<()> {
        let mut internal = self.lock()?;
        internal.orders.insert(order.id, order);
        self.sync_internal(&internal)
    }

    async fn mark_order_active(&self, order_id: i32) -> DosingResult<()> {
        let mut internal = self.lock()?;
        let order = internal
            .orders
            .get_mut(&order_id)
            .ok_or(DosingError::OrderNotFound(order_id))?;
        if order.status == OrderStatus::Closed {
            return Err(DosingError::OrderClosed(order_id));
        }
        order.status = OrderStatus::Active;
        self.sync_internal(&internal)
    }

    async fn insert_kit(&self, mut kit: TakeHomeKit) -> DosingResult<TakeHomeKit> {
        let mut internal = self.lock()?;
        kit.id = Sequences::next(&mut internal.sequences.kit);
        internal.kits.insert(kit.id, kit.clone());
        self.sync_internal(&internal)?;
        Ok(kit)
    }

    async fn get_kit(&self, kit_id: i32) -> DosingResult<Option<TakeHomeKit>> {
        Ok(self.lock()?.kits.get(&kit_id).cloned())
    }

    async fn kits_for_order(&self, order_id: i32) -> DosingResult<Vec<TakeHomeKit>> {
        Ok(self
            .lock()?
            .kits
            .values()
            .filter(|k| k.take_home_order_id == order_id)
            .cloned()
            .collect())
    }

    async fn mark_kit_voided(&self, kit_id: i32) -> DosingResult<()> {
        let mut internal = self.lock()?;
        let kit = internal
            .kits
            .get_mut(&kit_id)
            .ok_or_else(|| DosingError::StorageError(format!("kit {} was not found", kit_id)))?;
        kit.status = KitStatus::Voided;
        self.sync_internal(&internal)
    }

    async fn bulk_insert_doses(&self, doses: Vec<TakeHomeDose>) -> DosingResult<Vec<TakeHomeDose>> {
        let mut internal = self.lock()?;

        // Validate the whole batch before touching any table.
        let mut batch_bottle_uids = HashSet::new();
        let mut batch_seal_uids = HashSet::new();
        for dose in &doses {
            if internal.dose_ids_by_bottle_uid.contains_key(&dose.bottle_uid)
                || !batch_bottle_uids.insert(dose.bottle_uid.clone())
            {
                return Err(DosingError::InvalidData(format!(
                    "bottle uid {} already exists",
                    dose.bottle_uid
                )));
            }
            if internal.seal_uids.contains(&dose.seal_uid)
                || !batch_seal_uids.insert(dose.seal_uid.clone())
            {
                return Err(DosingError::InvalidData(format!(
                    "seal uid {} already exists",
                    dose.seal_uid
                )));
            }
        }

        let mut stored = Vec::with_capacity(doses.len());
        for mut dose in doses {
            dose.id = Sequences::next(&mut internal.sequences.dose);
            internal
                .dose_ids_by_bottle_uid
                .insert(dose.bottle_uid.clone(), dose.id);
            internal.seal_uids.insert(dose.seal_uid.clone());
            internal.doses.insert(dose.id, dose.clone());
            stored.push(dose);
        }
        self.sync_internal(&internal)?;
        Ok(stored)
    }

    async fn delete_doses_for_kit(&self, kit_id: i32) -> DosingResult<()> {
        let mut internal = self.lock()?;
        let removed: Vec<TakeHomeDose> = internal
            .doses
            .values()
            .filter(|d| d.kit_id == kit_id)
            .cloned()
            .collect();
        for dose in removed {
            internal.doses.remove(&dose.id);
            internal.dose_ids_by_bottle_uid.remove(&dose.bottle_uid);
            internal.seal_uids.remove(&dose.seal_uid);
        }
        self.sync_internal(&internal)
    }

    async fn dose_by_bottle_uid(&self, bottle_uid: &str) -> DosingResult<Option<TakeHomeDose>> {
        let internal = self.lock()?;
        Ok(internal
            .dose_ids_by_bottle_uid
            .get(bottle_uid)
            .and_then(|id| internal.doses.get(id))
            .cloned())
    }

    async fn doses_for_kit(&self, kit_id: i32) -> DosingResult<Vec<TakeHomeDose>> {
        Ok(self
            .lock()?
            .doses
            .values()
            .filter(|d| d.kit_id == kit_id)
            .cloned()
            .collect())
    }

    async fn mark_dose_returned(&self, dose_id: i32) -> DosingResult<()> {
        let mut internal = self.lock()?;
        let dose = internal
            .doses
            .get_mut(&dose_id)
            .ok_or_else(|| DosingError::StorageError(format!("dose {} was not found", dose_id)))?;
        if dose.status == DoseStatus::Returned {
            return Err(DosingError::AlreadyReturned(dose.bottle_uid.clone()));
        }
        dose.status = DoseStatus::Returned;
        self.sync_internal(&internal)
    }

    async fn insert_dose_event(&self, mut event: DoseEvent) -> DosingResult<DoseEvent> {
        let mut internal = self.lock()?;
        event.id = Sequences::next(&mut internal.sequences.dose_event);
        internal.dose_events.insert(event.id, event.clone());
        self.sync_internal(&internal)?;
        Ok(event)
    }

    async fn get_dose_event(&self, event_id: i32) -> DosingResult<Option<DoseEvent>> {
        Ok(self.lock()?.dose_events.get(&event_id).cloned())
    }

    async fn complete_dose_event(
        &self,
        event_id: i32,
        dispensed_ml: f64,
        outcome: DoseOutcome,
        device_events: Vec<DeviceEvent>,
        signature_hash: String,
    ) -> DosingResult<DoseEvent> {
        let mut internal = self.lock()?;
        let event = internal.dose_events.get_mut(&event_id).ok_or_else(|| {
            DosingError::StorageError(format!("dose event {} was not found", event_id))
        })?;
        if event.outcome.is_some() {
            return Err(DosingError::InvalidData(format!(
                "dose event {} was already completed",
                event_id
            )));
        }
        event.dispensed_ml = dispensed_ml;
        event.outcome = Some(outcome);
        event.device_events = device_events;
        event.signature_hash = Some(signature_hash);
        event.completed_at = Some(Utc::now());
        let completed = event.clone();
        self.sync_internal(&internal)?;
        Ok(completed)
    }

    async fn pending_dose_events_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DosingResult<Vec<DoseEvent>> {
        Ok(self
            .lock()?
            .dose_events
            .values()
            .filter(|e| e.is_pending() && e.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn get_bottle(&self, serial: &str) -> DosingResult<Option<Bottle>> {
        Ok(self.lock()?.bottles.get(serial).cloned())
    }

    async fn put_bottle(&self, bottle: Bottle) -> DosingResult<()> {
        let mut internal = self.lock()?;
        internal.bottles.insert(bottle.serial_no.clone(), bottle);
        self.sync_internal(&internal)
    }

    async fn apply_volume_change(
        &self,
        expected_volume: Option<f64>,
        mut tx: InventoryTransaction,
    ) -> DosingResult<Bottle> {
        let mut internal = self.lock()?;
        let bottle = internal
            .bottles
            .get_mut(&tx.bottle_id)
            .ok_or_else(|| DosingError::BottleNotFound(tx.bottle_id.clone()))?;

        if let Some(expected) = expected_volume {
            if (bottle.current_volume_ml - expected).abs() > VOLUME_EPSILON {
                return Err(DosingError::VolumeConflict {
                    serial: bottle.serial_no.clone(),
                    expected,
                    found: bottle.current_volume_ml,
                });
            }
        }

        let new_volume = bottle.current_volume_ml + tx.qty_ml;
        if new_volume < -VOLUME_EPSILON {
            return Err(DosingError::InsufficientVolume {
                serial: bottle.serial_no.clone(),
                available: bottle.current_volume_ml,
                delta: tx.qty_ml,
            });
        }
        bottle.current_volume_ml = new_volume.max(0.0);
        bottle.updated_at = Utc::now();
        let updated = bottle.clone();

        tx.id = Sequences::next(&mut internal.sequences.transaction);
        internal.ledger.push(tx);
        self.sync_internal(&internal)?;
        Ok(updated)
    }

    async fn ledger_for_bottle(&self, serial: &str) -> DosingResult<Vec<InventoryTransaction>> {
        Ok(self
            .lock()?
            .ledger
            .iter()
            .filter(|t| t.bottle_id == serial)
            .cloned()
            .collect())
    }

    async fn insert_hold(&self, mut hold: ComplianceHold) -> DosingResult<ComplianceHold> {
        let mut internal = self.lock()?;
        hold.id = Sequences::next(&mut internal.sequences.hold);
        internal.holds.insert(hold.id, hold.clone());
        self.sync_internal(&internal)?;
        Ok(hold)
    }

    async fn open_holds_for_patient(&self, patient_id: i32) -> DosingResult<Vec<ComplianceHold>> {
        Ok(self
            .lock()?
            .holds
            .values()
            .filter(|h| h.patient_id == patient_id && h.is_open())
            .cloned()
            .collect())
    }

    async fn insert_inspection(
        &self,
        mut inspection: ReturnInspection,
    ) -> DosingResult<ReturnInspection> {
        let mut internal = self.lock()?;
        inspection.id = Sequences::next(&mut internal.sequences.inspection);
        internal.inspections.insert(inspection.id, inspection.clone());
        self.sync_internal(&internal)?;
        Ok(inspection)
    }

    async fn append_audit(&self, mut entry: AuditEntry) -> DosingResult<AuditEntry> {
        let mut internal = self.lock()?;
        entry.id = Sequences::next(&mut internal.sequences.audit);
        internal.audit.push(entry.clone());
        self.sync_internal(&internal)?;
        Ok(entry)
    }

    async fn audit_trail(&self) -> DosingResult<Vec<AuditEntry>> {
        Ok(self.lock()?.audit.clone())
    }
}
