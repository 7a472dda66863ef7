// lib/src/device/mod.rs

pub mod serial;
pub mod sim;

use async_trait::async_trait;
use models::{DeviceEvent, DoseOutcome};
use serde::{Deserialize, Serialize};

pub use serial::SerialLinkGateway;
pub use sim::SimulatedDeviceGateway;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub ready: bool,
    pub device_id: String,
    /// Serial of the bottle currently loaded in the dispensing line.
    pub bottle_serial: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct DispenseCommand {
    /// Correlation token, the dose event id. The device echoes it back and
    /// can be queried for a terminal result by token after a lost response.
    pub command_token: String,
    pub requested_ml: f64,
}

#[derive(Debug, Clone)]
pub struct DispenseReport {
    pub actual_ml: f64,
    pub outcome: DoseOutcome,
    pub events: Vec<DeviceEvent>,
}

impl DispenseReport {
    pub fn aborted(events: Vec<DeviceEvent>) -> Self {
        DispenseReport {
            actual_ml: 0.0,
            outcome: DoseOutcome::Aborted,
            events,
        }
    }
}

/// Abstraction over the physical (or simulated) dispensing hardware.
///
/// `dispense` never fails past this boundary: transport faults, malformed
/// frames and timeouts are all folded into an aborted report carrying the
/// fault in its event trail. The coordinator decides what an abort means.
#[async_trait]
pub trait DispensingDeviceGateway: Send + Sync + std::fmt::Debug {
    fn device_id(&self) -> &str;

    async fn status(&self) -> DeviceStatus;

    async fn dispense(&self, command: DispenseCommand) -> DispenseReport;

    /// Terminal result for a previously issued command, if the device still
    /// knows about it. Used by the reconciliation sweep.
    async fn terminal_report(&self, command_token: &str) -> Option<DispenseReport>;
}
