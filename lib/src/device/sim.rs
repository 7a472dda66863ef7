// lib/src/device/sim.rs

use std::collections::HashMap;
use std::sync::Mutex;

use models::{DeviceEvent, DoseOutcome};
use rand::Rng;
use serde_json::json;

use super::{DeviceStatus, DispenseCommand, DispenseReport, DispensingDeviceGateway};

/// In-memory stand-in for the dispensing line. Used as the default gateway
/// when no device bridge is configured, and by tests to script readiness,
/// delivery variance and faults.
#[derive(Debug)]
pub struct SimulatedDeviceGateway {
    device_id: String,
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    ready: bool,
    bottle_serial: Option<String>,
    /// Relative jitter applied to each delivery, e.g. 0.01 for +/-1%.
    jitter: f64,
    fail_next: bool,
    completed: HashMap<String, DispenseReport>,
}

impl SimulatedDeviceGateway {
    pub fn new(device_id: &str) -> Self {
        SimulatedDeviceGateway {
            device_id: device_id.to_string(),
            state: Mutex::new(SimState {
                ready: true,
                bottle_serial: None,
                jitter: 0.0,
                fail_next: false,
                completed: HashMap::new(),
            }),
        }
    }

    pub fn with_bottle(self, serial: &str) -> Self {
        self.load_bottle(serial);
        self
    }

    pub fn with_jitter(self, jitter: f64) -> Self {
        self.state.lock().expect("sim state poisoned").jitter = jitter;
        self
    }

    pub fn load_bottle(&self, serial: &str) {
        self.state.lock().expect("sim state poisoned").bottle_serial = Some(serial.to_string());
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().expect("sim state poisoned").ready = ready;
    }

    /// The next dispense command aborts with a simulated hardware fault.
    pub fn inject_fault_once(&self) {
        self.state.lock().expect("sim state poisoned").fail_next = true;
    }

    /// Record a terminal result for a token the coordinator never heard
    /// back about, as the real controller does for lost responses.
    pub fn complete_out_of_band(&self, command_token: &str, actual_ml: f64) {
        let report = DispenseReport {
            actual_ml,
            outcome: DoseOutcome::Success,
            events: vec![DeviceEvent::new(
                "delivery_complete",
                json!({ "token": command_token, "actual_ml": actual_ml }),
            )],
        };
        self.state
            .lock()
            .expect("sim state poisoned")
            .completed
            .insert(command_token.to_string(), report);
    }
}

#[async_trait::async_trait]
impl DispensingDeviceGateway for SimulatedDeviceGateway {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn status(&self) -> DeviceStatus {
        let state = self.state.lock().expect("sim state poisoned");
        DeviceStatus {
            ready: state.ready && state.bottle_serial.is_some(),
            device_id: self.device_id.clone(),
            bottle_serial: state.bottle_serial.clone(),
            detail: if state.ready {
                "ready".to_string()
            } else {
                "simulated device offline".to_string()
            },
        }
    }

    async fn dispense(&self, command: DispenseCommand) -> DispenseReport {
        let mut state = self.state.lock().expect("sim state poisoned");
        let mut events = vec![DeviceEvent::new(
            "command_sent",
            json!({
                "token": command.command_token,
                "requested_ml": command.requested_ml,
            }),
        )];

        if state.fail_next || !state.ready {
            state.fail_next = false;
            events.push(DeviceEvent::new(
                "device_fault",
                json!({ "token": command.command_token, "detail": "simulated fault" }),
            ));
            let report = DispenseReport::aborted(events);
            state.completed.insert(command.command_token, report.clone());
            return report;
        }

        let actual_ml = if state.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(-state.jitter..=state.jitter);
            ((command.requested_ml * (1.0 + factor)) * 100.0).round() / 100.0
        } else {
            command.requested_ml
        };
        events.push(DeviceEvent::new(
            "delivery_complete",
            json!({ "token": command.command_token, "actual_ml": actual_ml }),
        ));
        let report = DispenseReport {
            actual_ml,
            outcome: DoseOutcome::Success,
            events,
        };
        state.completed.insert(command.command_token, report.clone());
        report
    }

    async fn terminal_report(&self, command_token: &str) -> Option<DispenseReport> {
        self.state
            .lock()
            .expect("sim state poisoned")
            .completed
            .get(command_token)
            .cloned()
    }
}
