//! Motion controller
//!
//! Owns the command link, the machine connection lifecycle, and the
//! coordinate frames. The machine itself always reports positions in
//! the work frame (it is re-zeroed with `G92` whenever the work origin
//! moves); the controller tracks the accumulated origin offset so it
//! can present machine-absolute positions and target them again later.
//!
//! All public motion operations are gated: they fail fast with exactly
//! one log event when the machine is disconnected or a job is running.
//! The job worker drives the machine through the ungated `pub(crate)`
//! operations instead.
//!
//! Controller methods must be called from within a Tokio runtime; the
//! position poll loop and the continuous jog worker are spawned tasks.

use crate::job::{JobMotion, ProcessControl};
use crate::transport::{CommandLink, Transport};
use async_trait::async_trait;
use engravekit_core::{
    Axis, ConnectionError, ConnectionParams, DeviceError, Error, EventDispatcher, MachineConfig,
    MachineEvent, MachineState, Offset, Position, ProtocolError, Result, ToolHead,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const STATUS_QUERY: &str = "M114";
const TOOL_IDENT_QUERY: &str = "M1005";
const ABSOLUTE_MODE: &str = "G90";
const RELATIVE_MODE: &str = "G91";
const HOME: &str = "G28";
const SET_WORK_ZERO: &str = "G92 X0 Y0 Z0";
const EMERGENCY_STOP: &str = "M112";

/// Coordinate frame of a targeted move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Machine-absolute coordinates (origin offset compensated)
    Machine,
    /// Work-frame coordinates (what the machine itself reports)
    Work,
    /// Relative to the current position
    Relative,
}

/// Direction of a jog or step move along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards increasing coordinates
    Positive,
    /// Towards decreasing coordinates
    Negative,
}

impl Direction {
    /// The sign factor of this direction.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

struct ControllerInner {
    link: CommandLink,
    params: ConnectionParams,
    config: MachineConfig,
    events: EventDispatcher,
    process: Arc<ProcessControl>,
    machine_state: RwLock<MachineState>,
    /// Last known position in the work frame, as the machine reports it.
    position: RwLock<Position>,
    /// Accumulated work-origin offset: absolute = reported + offset.
    origin_offset: RwLock<Offset>,
    tool_head: RwLock<Option<ToolHead>>,
    jogging: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    jog_task: Mutex<Option<JoinHandle<()>>>,
}

impl ControllerInner {
    fn send(&self, command: &str) -> Result<()> {
        self.link.send(command, true).map(|_| ())
    }

    fn query_reported_position(&self) -> Result<Option<Position>> {
        let lines = self.link.send(STATUS_QUERY, true)?;
        Ok(parse_position_report(&lines))
    }

    fn absolute_position(&self) -> Position {
        let reported = *self.position.read();
        let origin = *self.origin_offset.read();
        reported.offset_by(&origin)
    }

    fn store_reported_position(&self, reported: Position) {
        let changed = {
            let mut current = self.position.write();
            if *current == reported {
                false
            } else {
                *current = reported;
                true
            }
        };
        if changed {
            self.events
                .publish(MachineEvent::PositionChanged(self.absolute_position()));
        }
    }

    fn shift_reported_position(&self, dx: f64, dy: f64, dz: f64) {
        {
            let mut current = self.position.write();
            current.x += dx;
            current.y += dy;
            current.z += dz;
        }
        self.events
            .publish(MachineEvent::PositionChanged(self.absolute_position()));
    }
}

/// Handle to the machine motion controller. Cheap to clone; all clones
/// share the same connection and state.
#[derive(Clone)]
pub struct MotionController {
    inner: Arc<ControllerInner>,
}

impl MotionController {
    /// Create a controller over the given transport.
    pub fn new(
        transport: Box<dyn Transport>,
        params: ConnectionParams,
        config: MachineConfig,
    ) -> Self {
        let events = EventDispatcher::default();
        let process = Arc::new(ProcessControl::new(events.clone()));
        Self {
            inner: Arc::new(ControllerInner {
                link: CommandLink::new(transport),
                params,
                config,
                events,
                process,
                machine_state: RwLock::new(MachineState::Disconnected),
                position: RwLock::new(Position::default()),
                origin_offset: RwLock::new(Offset::zero()),
                tool_head: RwLock::new(None),
                jogging: AtomicBool::new(false),
                poll_task: Mutex::new(None),
                jog_task: Mutex::new(None),
            }),
        }
    }

    /// The event dispatcher shared by the controller and job engine.
    pub fn events(&self) -> EventDispatcher {
        self.inner.events.clone()
    }

    /// The shared process run-state gate.
    pub fn process_control(&self) -> Arc<ProcessControl> {
        self.inner.process.clone()
    }

    /// The machine configuration.
    pub fn config(&self) -> MachineConfig {
        self.inner.config.clone()
    }

    /// Current connection state.
    pub fn machine_state(&self) -> MachineState {
        *self.inner.machine_state.read()
    }

    /// Whether the machine link is up and setup completed.
    pub fn is_connected(&self) -> bool {
        self.machine_state() == MachineState::Connected
    }

    /// The identified tool head, if connected.
    pub fn tool_head(&self) -> Option<ToolHead> {
        *self.inner.tool_head.read()
    }

    /// The fixed laser offset of the identified tool head.
    pub fn tool_offset(&self) -> Offset {
        self.tool_head().map(|h| h.laser_offset()).unwrap_or_default()
    }

    /// The accumulated work-origin offset.
    pub fn origin_offset(&self) -> Offset {
        *self.inner.origin_offset.read()
    }

    /// Open the link, (optionally) home, and identify the tool head.
    ///
    /// On any setup failure the link is closed again and the machine
    /// stays disconnected.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.machine_state.write();
            if *state != MachineState::Disconnected {
                drop(state);
                self.inner
                    .events
                    .warn("Error: already connected to the engraver");
                return Err(ConnectionError::AlreadyConnected.into());
            }
            *state = MachineState::Connecting;
        }

        let endpoint = self.inner.params.endpoint();
        if let Err(e) = self.inner.link.connect(&self.inner.params) {
            *self.inner.machine_state.write() = MachineState::Disconnected;
            self.inner
                .events
                .warn(format!("Failed to connect to {}: {}", endpoint, e));
            return Err(e);
        }

        if let Err(e) = self.setup_machine() {
            let _ = self.inner.link.disconnect();
            *self.inner.machine_state.write() = MachineState::Disconnected;
            self.inner
                .events
                .warn(format!("Connection setup failed: {}", e));
            return Err(e);
        }

        *self.inner.machine_state.write() = MachineState::Connected;
        self.spawn_poll_loop();
        self.inner
            .events
            .publish(MachineEvent::Connected(endpoint.clone()));
        self.inner
            .events
            .log(format!("Connected to engraver at {}", endpoint));
        Ok(())
    }

    fn setup_machine(&self) -> Result<()> {
        self.inner.send(ABSOLUTE_MODE)?;

        // Home first so the origin reset precedes any offset selection.
        if self.inner.config.home_on_connect {
            self.run_homing(None)?;
        }

        let ident = self.inner.link.send(TOOL_IDENT_QUERY, true)?;
        let head = ToolHead::from_signature(ident.len()).ok_or(DeviceError::UnknownToolHead {
            lines: ident.len(),
        })?;
        *self.inner.tool_head.write() = Some(head);
        self.inner
            .events
            .log(format!("Identified tool head: {}", head));

        if let Some(pos) = self.inner.query_reported_position()? {
            self.inner.store_reported_position(pos);
        }
        Ok(())
    }

    /// Close the link and stop the background tasks.
    pub fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            self.inner
                .events
                .warn("Error: not connected to the engraver (disconnect rejected)");
            return Err(ConnectionError::NotConnected.into());
        }
        if self.inner.process.is_active() {
            self.inner
                .events
                .warn("Error: job is running (disconnect rejected)");
            return Err(DeviceError::Busy {
                operation: "disconnect".to_string(),
            }
            .into());
        }

        self.inner.jogging.store(false, Ordering::SeqCst);
        *self.inner.machine_state.write() = MachineState::Disconnected;
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.inner.jog_task.lock().take() {
            task.abort();
        }
        self.inner.link.disconnect()?;
        *self.inner.tool_head.write() = None;
        self.inner.events.publish(MachineEvent::Disconnected);
        self.inner.events.log("Disconnected from engraver");
        Ok(())
    }

    fn spawn_poll_loop(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let interval = Duration::from_millis(inner.config.poll_interval_ms);
            loop {
                tokio::time::sleep(interval).await;
                if *inner.machine_state.read() != MachineState::Connected {
                    break;
                }
                // The job worker owns the wire while a job runs.
                if inner.process.is_running() {
                    continue;
                }
                match inner.query_reported_position() {
                    Ok(Some(pos)) => inner.store_reported_position(pos),
                    Ok(None) => {}
                    Err(e) => tracing::debug!("position poll failed: {}", e),
                }
            }
        });
        *self.inner.poll_task.lock() = Some(handle);
    }

    fn guard_connected(&self, operation: &str) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner.events.warn(format!(
            "Error: not connected to the engraver ({} rejected)",
            operation
        ));
        Err(ConnectionError::NotConnected.into())
    }

    fn guard_manual(&self, operation: &str) -> Result<()> {
        self.guard_connected(operation)?;
        if self.inner.process.is_active() {
            self.inner
                .events
                .warn(format!("Error: job is running ({} rejected)", operation));
            return Err(DeviceError::Busy {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn validated(&self, check: Result<()>) -> Result<()> {
        if let Err(e) = check {
            self.inner.events.warn(format!("Error: {}", e));
            return Err(e);
        }
        Ok(())
    }

    /// The machine-absolute position (reported + origin offset).
    pub fn absolute_position(&self) -> Result<Position> {
        self.guard_connected("position query")?;
        Ok(self.inner.absolute_position())
    }

    /// Start continuous jogging along one axis. Commands are issued at
    /// the configured cadence until [`jog_stop`](Self::jog_stop).
    pub fn jog_start(&self, axis: Axis, direction: Direction, speed: f64) -> Result<()> {
        self.guard_manual("jog")?;
        self.validated(self.inner.config.validate_speed(speed))?;
        if self.inner.jogging.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = self.inner.clone();
        let speed = inner.config.clamp_axis_speed(axis, speed);
        let handle = tokio::spawn(async move {
            let cadence = Duration::from_millis(inner.config.jog_interval_ms);
            let step = direction.sign() * speed * cadence.as_secs_f64();
            if inner.send(RELATIVE_MODE).is_err() {
                inner.jogging.store(false, Ordering::SeqCst);
                return;
            }
            while inner.jogging.load(Ordering::SeqCst)
                && *inner.machine_state.read() == MachineState::Connected
            {
                let command = format!("G0 {}{:.3} F{:.0}", axis.letter(), step, speed * 60.0);
                if inner.send(&command).is_err() {
                    break;
                }
                match axis {
                    Axis::X => inner.shift_reported_position(step, 0.0, 0.0),
                    Axis::Y => inner.shift_reported_position(0.0, step, 0.0),
                    Axis::Z => inner.shift_reported_position(0.0, 0.0, step),
                }
                tokio::time::sleep(cadence).await;
            }
            let _ = inner.send(ABSOLUTE_MODE);
            inner.jogging.store(false, Ordering::SeqCst);
        });
        *self.inner.jog_task.lock() = Some(handle);
        Ok(())
    }

    /// Stop continuous jogging. Safe to call when not jogging.
    pub fn jog_stop(&self) {
        self.inner.jogging.store(false, Ordering::SeqCst);
    }

    /// Move a fixed distance along one axis.
    pub fn step_move(
        &self,
        axis: Axis,
        direction: Direction,
        distance: f64,
        speed: f64,
    ) -> Result<()> {
        self.guard_manual("step move")?;
        self.validated(self.inner.config.validate_step(distance))?;
        self.validated(self.inner.config.validate_speed(speed))?;
        let speed = self.inner.config.clamp_axis_speed(axis, speed);
        let delta = direction.sign() * distance;
        let (dx, dy, dz) = match axis {
            Axis::X => (delta, 0.0, 0.0),
            Axis::Y => (0.0, delta, 0.0),
            Axis::Z => (0.0, 0.0, delta),
        };
        self.relative_move(dx, dy, dz, speed)
    }

    /// Move to a target in the given coordinate frame.
    pub fn move_to(&self, mode: MoveMode, x: f64, y: f64, z: f64, speed: f64) -> Result<()> {
        self.guard_manual("move")?;
        self.validated(self.inner.config.validate_speed(speed))?;
        match mode {
            MoveMode::Work => self.work_move(x, y, z, speed),
            MoveMode::Machine => self.machine_move(x, y, z, speed),
            MoveMode::Relative => self.relative_move(x, y, z, speed),
        }
    }

    /// Travel back to the work origin.
    pub fn move_to_work_origin(&self, speed: f64) -> Result<()> {
        self.guard_manual("move to work origin")?;
        self.validated(self.inner.config.validate_speed(speed))?;
        self.work_move(0.0, 0.0, 0.0, speed)
    }

    /// Run the homing cycle, for one axis or all of them. Homing
    /// resets the work-origin offset.
    pub fn home(&self, axis: Option<Axis>) -> Result<()> {
        self.guard_manual("homing")?;
        self.run_homing(axis)?;
        if let Some(pos) = self.inner.query_reported_position()? {
            self.inner.store_reported_position(pos);
        }
        self.inner.events.log(match axis {
            Some(a) => format!("Homed {} axis", a),
            None => "Homing completed".to_string(),
        });
        Ok(())
    }

    fn run_homing(&self, axis: Option<Axis>) -> Result<()> {
        let command = match axis {
            Some(a) => format!("{} {}", HOME, a.letter()),
            None => HOME.to_string(),
        };
        self.inner.send(&command)?;
        *self.inner.origin_offset.write() = Offset::zero();
        Ok(())
    }

    /// Declare the current position as the new work origin.
    pub fn set_work_position(&self) -> Result<()> {
        self.guard_manual("set work position")?;
        self.capture_work_origin()?;
        self.inner.events.log("Work position set");
        Ok(())
    }

    /// Issue an immediate emergency stop. Fire-and-forget: the command
    /// is not acknowledged, and any running job is canceled.
    pub fn emergency_stop(&self) -> Result<()> {
        self.guard_connected("emergency stop")?;
        self.inner.jogging.store(false, Ordering::SeqCst);
        if self.inner.process.is_active() {
            self.inner.process.request_cancel();
        }
        self.inner.link.send(EMERGENCY_STOP, false)?;
        self.inner.events.warn("Emergency stop issued");
        Ok(())
    }

    /// Switch the positioning crosshair on or off.
    pub fn set_crosshair(&self, on: bool) -> Result<()> {
        self.guard_connected("crosshair")?;
        self.inner
            .send(if on { "M2000 L13 P1" } else { "M2000 L13 P0" })
    }

    /// Switch the enclosure light on or off.
    pub fn set_enclosure_light(&self, on: bool) -> Result<()> {
        self.guard_connected("enclosure light")?;
        self.inner
            .send(if on { "M2000 W1 P100" } else { "M2000 W1 P0" })
    }

    /// Switch the enclosure fan on or off.
    pub fn set_enclosure_fan(&self, on: bool) -> Result<()> {
        self.guard_connected("enclosure fan")?;
        self.inner
            .send(if on { "M2000 W2 P100" } else { "M2000 W2 P0" })
    }

    /// Switch air assist on or off.
    pub fn set_air_assist(&self, on: bool) -> Result<()> {
        self.guard_connected("air assist")?;
        self.inner.send(if on { "M8" } else { "M9" })
    }

    // Job-internal operations. These skip the run-state gate: the job
    // worker is the one component allowed to move the machine while
    // the process state is Running.

    pub(crate) fn capture_work_origin(&self) -> Result<()> {
        let reported = *self.inner.position.read();
        self.inner.send(SET_WORK_ZERO)?;
        {
            let mut origin = self.inner.origin_offset.write();
            *origin = origin.add(&Offset::new(reported.x, reported.y, reported.z));
        }
        *self.inner.position.write() = Position::new(0.0, 0.0, 0.0);
        Ok(())
    }

    pub(crate) fn machine_move(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()> {
        let origin = *self.inner.origin_offset.read();
        self.work_move(x - origin.x, y - origin.y, z - origin.z, speed)
    }

    pub(crate) fn work_move(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()> {
        let speed = self.inner.config.clamp_z_speed(speed);
        self.inner.send(&format!(
            "G0 X{:.3} Y{:.3} Z{:.3} F{:.0}",
            x,
            y,
            z,
            speed * 60.0
        ))?;
        self.inner
            .store_reported_position(Position::new(x, y, z));
        Ok(())
    }

    pub(crate) fn relative_move(&self, dx: f64, dy: f64, dz: f64, speed: f64) -> Result<()> {
        let speed = if dz != 0.0 {
            self.inner.config.clamp_z_speed(speed)
        } else {
            speed
        };
        self.inner.send(RELATIVE_MODE)?;
        self.inner.send(&format!(
            "G0 X{:.3} Y{:.3} Z{:.3} F{:.0}",
            dx,
            dy,
            dz,
            speed * 60.0
        ))?;
        self.inner.send(ABSOLUTE_MODE)?;
        self.inner.shift_reported_position(dx, dy, dz);
        Ok(())
    }

    pub(crate) fn send_line(&self, line: &str) -> Result<()> {
        self.inner.send(line)
    }

    /// Query the machine for its reported position right now.
    pub fn refresh_position(&self) -> Result<Position> {
        self.guard_connected("position refresh")?;
        match self.inner.query_reported_position()? {
            Some(pos) => {
                self.inner.store_reported_position(pos);
                Ok(self.inner.absolute_position())
            }
            None => Err(Error::from(ProtocolError::MissingPosition)),
        }
    }
}

#[async_trait]
impl JobMotion for MotionController {
    fn is_connected(&self) -> bool {
        MotionController::is_connected(self)
    }

    fn absolute_position(&self) -> Result<Position> {
        if !MotionController::is_connected(self) {
            return Err(ConnectionError::NotConnected.into());
        }
        Ok(self.inner.absolute_position())
    }

    fn tool_offset(&self) -> Offset {
        MotionController::tool_offset(self)
    }

    async fn move_machine_absolute(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()> {
        self.machine_move(x, y, z, speed)
    }

    async fn move_work_absolute(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()> {
        self.work_move(x, y, z, speed)
    }

    async fn move_relative(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<()> {
        self.relative_move(x, y, z, speed)
    }

    async fn set_work_origin(&self) -> Result<()> {
        self.capture_work_origin()
    }

    async fn send_program_line(&self, line: &str) -> Result<()> {
        self.send_line(line)
    }
}

/// Extract a position from a status response block.
///
/// The machine reports `X:<v> Y:<v> Z:<v> E:<v> ...`; the first three
/// space-separated colon pairs are the linear axes.
fn parse_position_report(lines: &[String]) -> Option<Position> {
    let line = lines.iter().find(|l| l.contains("X:"))?;
    let mut coords = [0.0_f64; 3];
    let mut count = 0;
    for part in line.split_whitespace() {
        if count == 3 {
            break;
        }
        let (_, value) = part.split_once(':')?;
        coords[count] = value.parse().ok()?;
        count += 1;
    }
    if count < 3 {
        return None;
    }
    Some(Position::new(coords[0], coords[1], coords[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_standard_status_report() {
        let report = lines(&["X:10.000 Y:-5.250 Z:3.100 E:0.000 Count X:800"]);
        let pos = parse_position_report(&report).unwrap();
        assert_eq!(pos, Position::new(10.0, -5.25, 3.1));
    }

    #[test]
    fn skips_preamble_lines() {
        let report = lines(&["echo:busy", "X:1.0 Y:2.0 Z:3.0 E:0.0"]);
        let pos = parse_position_report(&report).unwrap();
        assert_eq!(pos, Position::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn rejects_malformed_reports() {
        assert!(parse_position_report(&lines(&[])).is_none());
        assert!(parse_position_report(&lines(&["ok done"])).is_none());
        assert!(parse_position_report(&lines(&["X:1.0 Y:abc Z:3.0"])).is_none());
        assert!(parse_position_report(&lines(&["X:1.0 Y:2.0"])).is_none());
    }

    #[test]
    fn direction_signs() {
        assert_eq!(Direction::Positive.sign(), 1.0);
        assert_eq!(Direction::Negative.sign(), -1.0);
    }
}
