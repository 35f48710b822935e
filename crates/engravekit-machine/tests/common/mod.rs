#![allow(dead_code)] // not every test binary touches every helper

//! A scripted machine on the other end of the transport.
//!
//! Understands just enough of the wire protocol to exercise the
//! controller: positioning mode, homing, moves, work-origin reset,
//! the status query, and the tool head identification query.

use engravekit_core::{ConnectionError, ConnectionParams, MachineConfig, Result};
use engravekit_machine::{MotionController, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct SimState {
    open: bool,
    relative: bool,
    x: f64,
    y: f64,
    z: f64,
    sent: Vec<String>,
    ident_lines: usize,
    responses: VecDeque<String>,
}

pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

/// Test-side handle inspecting and steering the simulated machine.
#[derive(Clone)]
pub struct MachineSim {
    state: Arc<Mutex<SimState>>,
}

impl MachineSim {
    pub fn new() -> (SimTransport, MachineSim) {
        let state = Arc::new(Mutex::new(SimState {
            open: false,
            relative: false,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            sent: Vec::new(),
            ident_lines: 2,
            responses: VecDeque::new(),
        }));
        (
            SimTransport {
                state: state.clone(),
            },
            MachineSim { state },
        )
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn last_sent(&self) -> Option<String> {
        self.state.lock().sent.last().cloned()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn position(&self) -> (f64, f64, f64) {
        let s = self.state.lock();
        (s.x, s.y, s.z)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn set_ident_lines(&self, lines: usize) {
        self.state.lock().ident_lines = lines;
    }
}

impl Transport for SimTransport {
    fn open(&mut self, _params: &ConnectionParams) -> Result<()> {
        self.state.lock().open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut s = self.state.lock();
        if !s.open {
            return Err(ConnectionError::NotConnected.into());
        }
        let line = line.trim().to_string();
        s.sent.push(line.clone());

        let mut acked = true;
        if line == "G90" {
            s.relative = false;
        } else if line == "G91" {
            s.relative = true;
        } else if line.starts_with("G28") || line.starts_with("G92") {
            s.x = 0.0;
            s.y = 0.0;
            s.z = 0.0;
        } else if line.starts_with("G0") || line.starts_with("G1") {
            for word in line.split_whitespace().skip(1) {
                let Some(value) = word.get(1..).and_then(|v| v.parse::<f64>().ok()) else {
                    continue;
                };
                let relative = s.relative;
                let apply = |slot: &mut f64| {
                    if relative {
                        *slot += value;
                    } else {
                        *slot = value;
                    }
                };
                match word.as_bytes()[0] {
                    b'X' => apply(&mut s.x),
                    b'Y' => apply(&mut s.y),
                    b'Z' => apply(&mut s.z),
                    _ => {}
                }
            }
        } else if line == "M114" {
            let report = format!(
                "X:{:.3} Y:{:.3} Z:{:.3} E:0.000 Count X:0",
                s.x, s.y, s.z
            );
            s.responses.push_back(report);
        } else if line == "M1005" {
            for i in 0..s.ident_lines {
                s.responses.push_back(format!("Info{}: value", i));
            }
        } else if line == "M112" {
            // Emergency stop is never acknowledged.
            acked = false;
        }
        if acked {
            s.responses.push_back("ok".to_string());
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.state.lock().responses.pop_front())
    }
}

/// Configuration with the background poll effectively disabled, so
/// assertions on the sent-command log stay deterministic.
pub fn test_config() -> MachineConfig {
    MachineConfig {
        poll_interval_ms: 60_000,
        jog_interval_ms: 10,
        ..Default::default()
    }
}

pub fn sim_controller() -> (MotionController, MachineSim) {
    sim_controller_with(test_config())
}

pub fn sim_controller_with(config: MachineConfig) -> (MotionController, MachineSim) {
    let (transport, sim) = MachineSim::new();
    let params = ConnectionParams {
        port: "sim".to_string(),
        ..Default::default()
    };
    let controller = MotionController::new(Box::new(transport), params, config);
    (controller, sim)
}
