// lib/src/device/serial.rs

use std::time::Duration;

use log::{debug, warn};
use models::{DeviceEvent, DoseOutcome};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{DeviceStatus, DispenseCommand, DispenseReport, DispensingDeviceGateway};

/// Production gateway to the dispensing line controller.
///
/// The controller exposes its RS-232 port through a TCP bridge speaking a
/// line-framed text protocol, one exchange per connection:
///
/// ```text
/// > STATUS
/// < READY B1        (or BUSY <detail> / EMPTY)
/// > DISP <token> <ml>
/// < DONE <token> <actual_ml>   (or FAULT <token> <detail>)
/// > QUERY <token>
/// < DONE <token> <actual_ml> | FAULT <token> <detail> | UNKNOWN <token>
/// ```
#[derive(Debug)]
pub struct SerialLinkGateway {
    device_id: String,
    addr: String,
    timeout: Duration,
}

impl SerialLinkGateway {
    pub fn new(device_id: &str, addr: &str, timeout: Duration) -> Self {
        SerialLinkGateway {
            device_id: device_id.to_string(),
            addr: addr.to_string(),
            timeout,
        }
    }

    async fn exchange(&self, line: &str) -> std::io::Result<String> {
        let io = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;
            let mut reader = BufReader::new(stream);
            let mut response = String::new();
            reader.read_line(&mut response).await?;
            Ok::<String, std::io::Error>(response.trim().to_string())
        };
        match timeout(self.timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no response from {} within {:?}", self.addr, self.timeout),
            )),
        }
    }
}

#[async_trait::async_trait]
impl DispensingDeviceGateway for SerialLinkGateway {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn status(&self) -> DeviceStatus {
        match self.exchange("STATUS").await {
            Ok(response) => {
                debug!("device {} status: {}", self.device_id, response);
                let mut parts = response.split_whitespace();
                match parts.next() {
                    Some("READY") => DeviceStatus {
                        ready: true,
                        device_id: self.device_id.clone(),
                        bottle_serial: parts.next().map(str::to_string),
                        detail: "ready".to_string(),
                    },
                    _ => DeviceStatus {
                        ready: false,
                        device_id: self.device_id.clone(),
                        bottle_serial: None,
                        detail: response,
                    },
                }
            }
            Err(e) => DeviceStatus {
                ready: false,
                device_id: self.device_id.clone(),
                bottle_serial: None,
                detail: format!("link error: {}", e),
            },
        }
    }

    async fn dispense(&self, command: DispenseCommand) -> DispenseReport {
        let mut events = vec![DeviceEvent::new(
            "command_sent",
            json!({
                "token": command.command_token,
                "requested_ml": command.requested_ml,
            }),
        )];

        let line = format!("DISP {} {:.2}", command.command_token, command.requested_ml);
        let response = match self.exchange(&line).await {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "device {} dispense {} failed: {}",
                    self.device_id, command.command_token, e
                );
                events.push(DeviceEvent::new("link_fault", json!({ "error": e.to_string() })));
                return DispenseReport::aborted(events);
            }
        };

        match parse_terminal_line(&response, &command.command_token) {
            Some(report_line) => {
                events.extend(report_line.events);
                DispenseReport {
                    actual_ml: report_line.actual_ml,
                    outcome: report_line.outcome,
                    events,
                }
            }
            None => {
                events.push(DeviceEvent::new(
                    "protocol_error",
                    json!({ "response": response }),
                ));
                DispenseReport::aborted(events)
            }
        }
    }

    async fn terminal_report(&self, command_token: &str) -> Option<DispenseReport> {
        let response = match self.exchange(&format!("QUERY {}", command_token)).await {
            Ok(r) => r,
            Err(e) => {
                warn!("device {} query {} failed: {}", self.device_id, command_token, e);
                return None;
            }
        };
        if response.starts_with("UNKNOWN") {
            return None;
        }
        parse_terminal_line(&response, command_token).map(|line| DispenseReport {
            actual_ml: line.actual_ml,
            outcome: line.outcome,
            events: line.events,
        })
    }
}

struct TerminalLine {
    actual_ml: f64,
    outcome: DoseOutcome,
    events: Vec<DeviceEvent>,
}

// DONE/FAULT frames; anything else is a protocol error handled by the caller.
fn parse_terminal_line(response: &str, expected_token: &str) -> Option<TerminalLine> {
    let mut parts = response.split_whitespace();
    let verb = parts.next()?;
    let token = parts.next()?;
    if token != expected_token {
        return None;
    }
    match verb {
        "DONE" => {
            let actual_ml: f64 = parts.next()?.parse().ok()?;
            Some(TerminalLine {
                actual_ml,
                outcome: DoseOutcome::Success,
                events: vec![DeviceEvent::new(
                    "delivery_complete",
                    json!({ "token": token, "actual_ml": actual_ml }),
                )],
            })
        }
        "FAULT" => {
            let detail = parts.collect::<Vec<_>>().join(" ");
            Some(TerminalLine {
                actual_ml: 0.0,
                outcome: DoseOutcome::Aborted,
                events: vec![DeviceEvent::new(
                    "device_fault",
                    json!({ "token": token, "detail": detail }),
                )],
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_done_and_fault_frames() {
        let done = parse_terminal_line("DONE 17 49.80", "17").unwrap();
        assert_eq!(done.outcome, DoseOutcome::Success);
        assert!((done.actual_ml - 49.8).abs() < f64::EPSILON);

        let fault = parse_terminal_line("FAULT 17 motor stall", "17").unwrap();
        assert_eq!(fault.outcome, DoseOutcome::Aborted);
        assert_eq!(fault.actual_ml, 0.0);
    }

    #[test]
    fn rejects_mismatched_token_and_garbage() {
        assert!(parse_terminal_line("DONE 18 49.80", "17").is_none());
        assert!(parse_terminal_line("WAT 17", "17").is_none());
        assert!(parse_terminal_line("DONE 17 not-a-number", "17").is_none());
    }
}
