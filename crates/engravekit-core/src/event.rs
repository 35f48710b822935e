//! Event system for machine and job observers
//!
//! State mutations and event emission are decoupled: components mutate
//! their state first, then publish an event on the dispatcher. External
//! observers (UI, test harnesses) subscribe to the broadcast channel
//! rather than hooking setters.

use crate::data::{Position, ProcessState};
use tokio::sync::broadcast;

/// Events published by the motion controller, rotary subsystem, and
/// job execution engine.
#[derive(Debug, Clone)]
pub enum MachineEvent {
    /// Transport opened and the machine is ready
    Connected(String),
    /// Transport closed
    Disconnected,
    /// Absolute position refreshed
    PositionChanged(Position),
    /// A rotary motor moved
    RotaryPositionChanged {
        /// Motor id on the servo bus.
        id: u8,
        /// Current angle in degrees.
        degrees: f64,
    },
    /// Human-readable log line; every failure path produces one
    Log(String),
    /// The job engine changed state
    ProcessStateChanged(ProcessState),
    /// Remaining job time updated
    RemainingTimeChanged {
        /// Remaining seconds.
        seconds: f64,
        /// Formatted ETA string for display.
        eta: String,
    },
}

impl std::fmt::Display for MachineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineEvent::Connected(endpoint) => write!(f, "Connected to {}", endpoint),
            MachineEvent::Disconnected => write!(f, "Disconnected"),
            MachineEvent::PositionChanged(pos) => write!(f, "Position: {}", pos),
            MachineEvent::RotaryPositionChanged { id, degrees } => {
                write!(f, "Rotary {}: {:.2} deg", id, degrees)
            }
            MachineEvent::Log(msg) => write!(f, "{}", msg),
            MachineEvent::ProcessStateChanged(state) => write!(f, "Process: {}", state),
            MachineEvent::RemainingTimeChanged { eta, .. } => write!(f, "{}", eta),
        }
    }
}

/// Format a remaining-time value in seconds as an ETA display string.
pub fn format_eta(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("ETA - {}:{:02}:{:02}", h, m, s)
}

/// Event dispatcher publishing [`MachineEvent`]s to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: broadcast::Sender<MachineEvent>,
}

impl EventDispatcher {
    /// Create a new dispatcher with the given broadcast buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<MachineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers. Events published with no
    /// subscribers are dropped silently.
    pub fn publish(&self, event: MachineEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a log event and mirror it on the tracing output.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.publish(MachineEvent::Log(message));
    }

    /// Emit a log event for a failure path, mirrored at warn level.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.publish(MachineEvent::Log(message));
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
