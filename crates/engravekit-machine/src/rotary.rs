//! Rotary axis subsystem
//!
//! Rotary motors hang off a separate half-duplex servo bus, not the
//! G-code link. Positions on the wire are raw encoder counts where one
//! full turn spans [`RAW_FULL_TURN`] counts; the public API speaks
//! degrees.
//!
//! Positioning accuracy of the servos is poor near the target, so a
//! blocking high-resolution move finishes with a fine-correction loop:
//! while the motor sits more than [`FINE_TOLERANCE_DEG`] off target, it
//! is nudged [`FINE_STEP_DEG`] past the target at low speed, up to
//! [`MAX_FINE_MOVES`] times.

use engravekit_core::{
    ConnectionError, DeviceError, EventDispatcher, MachineEvent, Result,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Raw encoder counts per full turn.
pub const RAW_FULL_TURN: f64 = 4095.0;

/// Highest motor id probed during the bus scan.
const MAX_MOTOR_ID: u8 = 253;

/// Angular error tolerated after a high-resolution move, degrees.
const FINE_TOLERANCE_DEG: f64 = 0.1;

/// Overshoot applied per fine-correction nudge, degrees.
const FINE_STEP_DEG: f64 = 0.3;

/// Maximum number of fine-correction nudges.
const MAX_FINE_MOVES: usize = 5;

/// Speed and acceleration used for fine-correction nudges.
const FINE_SPEED: u16 = 100;
const FINE_ACC: u8 = 10;

const DEFAULT_SPEED: u16 = 1000;
const DEFAULT_ACC: u8 = 50;

/// Convert degrees to raw encoder counts.
pub fn degrees_to_raw(degrees: f64) -> u16 {
    let wrapped = degrees.rem_euclid(360.0);
    (wrapped / 360.0 * RAW_FULL_TURN).round() as u16
}

/// Convert raw encoder counts to degrees.
pub fn raw_to_degrees(raw: u16) -> f64 {
    raw as f64 / RAW_FULL_TURN * 360.0
}

/// A half-duplex servo bus carrying one register protocol.
///
/// All calls block for at most the transport read timeout. `ping`
/// swallows errors: an unanswered id is simply absent.
pub trait ServoBus: Send {
    /// Open the bus.
    fn open(&mut self) -> Result<()>;

    /// Close the bus. Closing a closed bus is a no-op.
    fn close(&mut self);

    /// Whether a motor answers at this id.
    fn ping(&mut self, id: u8) -> bool;

    /// Read a motor's present position in raw counts.
    fn read_position(&mut self, id: u8) -> Result<u16>;

    /// Whether a motor is currently moving.
    fn read_moving(&mut self, id: u8) -> Result<bool>;

    /// Command a motor to a raw goal position.
    fn write_position(&mut self, id: u8, raw: u16, speed: u16, acc: u8) -> Result<()>;

    /// Enable or disable a motor's holding torque.
    fn set_torque(&mut self, id: u8, on: bool) -> Result<()>;
}

const SCS_HEADER: [u8; 2] = [0xFF, 0xFF];
const INSTR_PING: u8 = 0x01;
const INSTR_READ: u8 = 0x02;
const INSTR_WRITE: u8 = 0x03;
const REG_TORQUE_ENABLE: u8 = 0x28;
const REG_GOAL_ACC: u8 = 0x29;
const REG_PRESENT_POSITION: u8 = 0x38;
const REG_MOVING: u8 = 0x42;

/// [`ServoBus`] over a serial half-duplex register protocol.
///
/// Packet layout: `FF FF id len instr params.. chk`, checksum the
/// inverted byte sum of everything after the header. Status replies
/// mirror the layout with an error byte in place of the instruction.
pub struct ScsSerialBus {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl ScsSerialBus {
    /// Create a closed bus for the given serial port.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
        }
    }

    fn transact(&mut self, id: u8, instr: u8, params: &[u8]) -> Result<Vec<u8>> {
        use std::io::{Read, Write};

        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut packet = Vec::with_capacity(6 + params.len());
        packet.extend_from_slice(&SCS_HEADER);
        packet.push(id);
        packet.push((params.len() + 2) as u8);
        packet.push(instr);
        packet.extend_from_slice(params);
        let sum = packet[2..]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        packet.push(!sum);
        port.write_all(&packet)?;
        port.flush()?;

        let mut header = [0u8; 5];
        port.read_exact(&mut header)?;
        if header[0..2] != SCS_HEADER || header[2] != id {
            return Err(engravekit_core::ProtocolError::ParseError {
                response: format!("bad servo reply header {:02x?}", header),
            }
            .into());
        }
        if header[4] != 0 {
            return Err(engravekit_core::Error::other(format!(
                "servo {} reported error status {:#04x}",
                id, header[4]
            )));
        }
        let data_len = (header[3] as usize).saturating_sub(2);
        let mut data = vec![0u8; data_len + 1];
        port.read_exact(&mut data)?;
        data.pop();
        Ok(data)
    }
}

impl ServoBus for ScsSerialBus {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| ConnectionError::OpenFailed {
                endpoint: self.port_name.clone(),
                reason: e.to_string(),
            })?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn ping(&mut self, id: u8) -> bool {
        self.transact(id, INSTR_PING, &[]).is_ok()
    }

    fn read_position(&mut self, id: u8) -> Result<u16> {
        let data = self.transact(id, INSTR_READ, &[REG_PRESENT_POSITION, 2])?;
        match data.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(engravekit_core::ProtocolError::ParseError {
                response: format!("short position reply from servo {}", id),
            }
            .into()),
        }
    }

    fn read_moving(&mut self, id: u8) -> Result<bool> {
        let data = self.transact(id, INSTR_READ, &[REG_MOVING, 1])?;
        Ok(data.first().copied().unwrap_or(0) != 0)
    }

    fn write_position(&mut self, id: u8, raw: u16, speed: u16, acc: u8) -> Result<()> {
        // Acceleration, goal position, goal time, goal speed are
        // contiguous registers; one write sets them all.
        let pos = raw.to_le_bytes();
        let vel = speed.to_le_bytes();
        let params = [
            REG_GOAL_ACC,
            acc,
            pos[0],
            pos[1],
            0,
            0,
            vel[0],
            vel[1],
        ];
        self.transact(id, INSTR_WRITE, &params).map(|_| ())
    }

    fn set_torque(&mut self, id: u8, on: bool) -> Result<()> {
        self.transact(id, INSTR_WRITE, &[REG_TORQUE_ENABLE, on as u8])
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
struct RotaryMotor {
    id: u8,
    speed: u16,
    acc: u8,
    /// Raw position captured as the motor's work zero.
    work_raw: u16,
    /// Last raw position seen by the tracking loop.
    last_raw: u16,
}

struct RotaryInner {
    bus: Mutex<Box<dyn ServoBus>>,
    motors: RwLock<Vec<RotaryMotor>>,
    connected: AtomicBool,
    events: EventDispatcher,
    track_task: Mutex<Option<JoinHandle<()>>>,
}

impl RotaryInner {
    fn motor(&self, id: u8) -> Result<RotaryMotor> {
        self.motors
            .read()
            .iter()
            .find(|m| m.id == id)
            .copied()
            .ok_or_else(|| DeviceError::MotorNotFound { id }.into())
    }

    fn update_motor(&self, id: u8, apply: impl FnOnce(&mut RotaryMotor)) {
        if let Some(motor) = self.motors.write().iter_mut().find(|m| m.id == id) {
            apply(motor);
        }
    }
}

/// Handle to the rotary subsystem. Cheap to clone.
#[derive(Clone)]
pub struct RotaryController {
    inner: Arc<RotaryInner>,
}

impl RotaryController {
    /// Create a controller over the given bus.
    pub fn new(bus: Box<dyn ServoBus>, events: EventDispatcher) -> Self {
        Self {
            inner: Arc::new(RotaryInner {
                bus: Mutex::new(bus),
                motors: RwLock::new(Vec::new()),
                connected: AtomicBool::new(false),
                events,
                track_task: Mutex::new(None),
            }),
        }
    }

    /// Whether the bus is open and motors were scanned.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Ids of the detected motors.
    pub fn motor_ids(&self) -> Vec<u8> {
        self.inner.motors.read().iter().map(|m| m.id).collect()
    }

    /// Open the bus and scan it for motors. Spawns a tracking loop
    /// that publishes position events for externally moved motors.
    pub fn connect(&self) -> Result<()> {
        if self.is_connected() {
            self.inner
                .events
                .warn("Error: rotary bus already connected");
            return Err(ConnectionError::AlreadyConnected.into());
        }
        {
            let mut bus = self.inner.bus.lock();
            bus.open()?;
            let mut motors = Vec::new();
            for id in 1..=MAX_MOTOR_ID {
                if !bus.ping(id) {
                    continue;
                }
                let raw = bus.read_position(id)?;
                motors.push(RotaryMotor {
                    id,
                    speed: DEFAULT_SPEED,
                    acc: DEFAULT_ACC,
                    work_raw: raw,
                    last_raw: raw,
                });
            }
            *self.inner.motors.write() = motors;
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner
            .events
            .log(format!("Detected rotary motors: {:?}", self.motor_ids()));
        self.spawn_track_loop();
        Ok(())
    }

    /// Close the bus and stop the tracking loop.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.track_task.lock().take() {
            task.abort();
        }
        self.inner.bus.lock().close();
        self.inner.motors.write().clear();
        self.inner.events.log("Rotary bus disconnected");
    }

    fn spawn_track_loop(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if !inner.connected.load(Ordering::SeqCst) {
                    break;
                }
                let ids: Vec<u8> = inner.motors.read().iter().map(|m| m.id).collect();
                for id in ids {
                    let raw = { inner.bus.lock().read_position(id) };
                    let Ok(raw) = raw else { continue };
                    let moved = inner
                        .motor(id)
                        .map(|m| m.last_raw != raw)
                        .unwrap_or(false);
                    if moved {
                        inner.update_motor(id, |m| m.last_raw = raw);
                        inner.events.publish(MachineEvent::RotaryPositionChanged {
                            id,
                            degrees: raw_to_degrees(raw),
                        });
                    }
                }
            }
        });
        *self.inner.track_task.lock() = Some(handle);
    }

    fn guard_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner
            .events
            .warn("Error: rotary bus not connected");
        Err(ConnectionError::NotConnected.into())
    }

    /// Set the speed used for a motor's moves.
    pub fn set_speed(&self, id: u8, speed: u16) -> Result<()> {
        self.guard_connected()?;
        self.inner.motor(id)?;
        self.inner.update_motor(id, |m| m.speed = speed);
        Ok(())
    }

    /// Set the acceleration used for a motor's moves.
    pub fn set_acceleration(&self, id: u8, acc: u8) -> Result<()> {
        self.guard_connected()?;
        self.inner.motor(id)?;
        self.inner.update_motor(id, |m| m.acc = acc);
        Ok(())
    }

    /// Enable or disable a motor's holding torque.
    pub fn set_torque(&self, id: u8, on: bool) -> Result<()> {
        self.guard_connected()?;
        self.inner.motor(id)?;
        self.inner.bus.lock().set_torque(id, on)
    }

    /// Read a motor's current angle.
    pub fn read_degrees(&self, id: u8) -> Result<f64> {
        self.guard_connected()?;
        self.inner.motor(id)?;
        let raw = { self.inner.bus.lock().read_position(id)? };
        self.inner.update_motor(id, |m| m.last_raw = raw);
        Ok(raw_to_degrees(raw))
    }

    /// Capture a motor's current position as its work zero.
    pub fn set_work_position(&self, id: u8) -> Result<()> {
        self.guard_connected()?;
        self.inner.motor(id)?;
        let raw = { self.inner.bus.lock().read_position(id)? };
        self.inner.update_motor(id, |m| {
            m.work_raw = raw;
            m.last_raw = raw;
        });
        Ok(())
    }

    /// Return a motor to its captured work zero, blocking until it
    /// settles.
    pub async fn move_to_work_position(&self, id: u8) -> Result<()> {
        self.guard_connected()?;
        let motor = self.inner.motor(id)?;
        self.write_goal(id, motor.work_raw, motor.speed, motor.acc)?;
        self.wait_settled(id).await
    }

    /// Move a motor to an absolute angle.
    ///
    /// With `blocking` the call waits until the motor stops; with
    /// `high_resolution` it additionally runs the fine-correction
    /// loop (implies waiting).
    pub async fn move_to_degrees(
        &self,
        id: u8,
        degrees: f64,
        blocking: bool,
        high_resolution: bool,
    ) -> Result<()> {
        self.guard_connected()?;
        let motor = self.inner.motor(id)?;
        self.write_goal(id, degrees_to_raw(degrees), motor.speed, motor.acc)?;
        if !blocking && !high_resolution {
            return Ok(());
        }
        self.wait_settled(id).await?;
        if !high_resolution {
            return Ok(());
        }

        let target = degrees.rem_euclid(360.0);
        for _ in 0..MAX_FINE_MOVES {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let current = self.read_degrees(id)?;
            let error = target - current;
            if error.abs() <= FINE_TOLERANCE_DEG {
                break;
            }
            let nudge = target + FINE_STEP_DEG * error.signum();
            self.write_goal(id, degrees_to_raw(nudge), FINE_SPEED, FINE_ACC)?;
            self.wait_settled(id).await?;
        }
        Ok(())
    }

    /// Move a motor by a relative angle.
    pub async fn move_by_degrees(&self, id: u8, delta: f64, blocking: bool) -> Result<()> {
        let current = self.read_degrees(id)?;
        self.move_to_degrees(id, current + delta, blocking, false).await
    }

    fn write_goal(&self, id: u8, raw: u16, speed: u16, acc: u8) -> Result<()> {
        self.inner.bus.lock().write_position(id, raw, speed, acc)
    }

    async fn wait_settled(&self, id: u8) -> Result<()> {
        // The moving flag can lag the goal write by one poll.
        tokio::time::sleep(Duration::from_millis(50)).await;
        loop {
            let moving = { self.inner.bus.lock().read_moving(id)? };
            if !moving {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
