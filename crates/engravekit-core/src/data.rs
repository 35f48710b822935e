//! Data models for positions, offsets, and machine state
//!
//! This module provides:
//! - Position tracking with an optional fourth rotary axis
//! - Origin and tool offset vectors
//! - Machine connection and process state enums
//! - Tool head identities with their fixed laser offsets

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three linear machine axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
}

impl Axis {
    /// The axis letter used in G-code words.
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Position in machine length units with an optional rotary angle.
///
/// Always a value type: copied, never aliased. The rotary component
/// `a` is an angle in degrees, normalized to `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// Rotary angle in degrees, if the position carries a fourth axis
    pub a: Option<f64>,
}

impl Position {
    /// Create a new three-axis position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, a: None }
    }

    /// Create a four-axis position. The angle is normalized to `[0, 360)`.
    pub fn with_a(x: f64, y: f64, z: f64, a: f64) -> Self {
        Self {
            x,
            y,
            z,
            a: Some(a.rem_euclid(360.0)),
        }
    }

    /// Euclidean distance to another position over the linear axes.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// This position shifted by an offset vector.
    pub fn offset_by(&self, offset: &Offset) -> Self {
        Self {
            x: self.x + offset.x,
            y: self.y + offset.y,
            z: self.z + offset.z,
            a: self.a,
        }
    }

    /// This position with an offset vector subtracted.
    pub fn without_offset(&self, offset: &Offset) -> Self {
        Self {
            x: self.x - offset.x,
            y: self.y - offset.y,
            z: self.z - offset.z,
            a: self.a,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.a {
            Some(a) => write!(
                f,
                "X:{:.3} Y:{:.3} Z:{:.3} A:{:.2}",
                self.x, self.y, self.z, a
            ),
            None => write!(f, "X:{:.3} Y:{:.3} Z:{:.3}", self.x, self.y, self.z),
        }
    }
}

/// A vector applied to translate between coordinate frames.
///
/// Used for both the user-settable origin offset (machine-absolute to
/// work frame) and the fixed per-tool laser offset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

impl Offset {
    /// Create a new offset vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero offset.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Whether all components are zero.
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Euclidean length of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Component-wise sum with another offset.
    pub fn add(&self, other: &Offset) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Connection state of the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport opening / homing / identifying the tool head
    Connecting,
    /// Ready for motion commands
    Connected,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Disconnected => write!(f, "Disconnected"),
            MachineState::Connecting => write!(f, "Connecting"),
            MachineState::Connected => write!(f, "Connected"),
        }
    }
}

/// Execution state of the job engine.
///
/// Cancellation is a transient flag observed by the worker, not a
/// persisted state; a canceled job returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessState {
    /// No job running; queue and offsets may be edited
    #[default]
    Idle,
    /// The execution worker is active
    Running,
    /// The worker is blocked on the pause gate
    Paused,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Idle => write!(f, "Idle"),
            ProcessState::Running => write!(f, "Running"),
            ProcessState::Paused => write!(f, "Paused"),
        }
    }
}

/// Known tool head identities.
///
/// The attached head is identified from the machine's identification
/// response: the total line count of the block is the signature that
/// disambiguates head variants. Anything else is unsupported and the
/// controller disconnects for safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolHead {
    /// 10W diode laser module
    Laser10W,
    /// 20W diode laser module
    Laser20W,
    /// 40W diode laser module
    Laser40W,
}

impl ToolHead {
    /// Look up a tool head by the line count of its identification block.
    pub fn from_signature(lines: usize) -> Option<Self> {
        match lines {
            2 => Some(ToolHead::Laser10W),
            4 => Some(ToolHead::Laser20W),
            6 => Some(ToolHead::Laser40W),
            _ => None,
        }
    }

    /// The fixed vector between the machine's reference tool and this
    /// head's laser focus point. Applied before running a job step's
    /// program; never user-settable at runtime.
    pub fn laser_offset(&self) -> Offset {
        match self {
            ToolHead::Laser10W => Offset::new(-10.4, -22.35, 0.0),
            ToolHead::Laser20W => Offset::new(-12.6, -24.8, 0.0),
            ToolHead::Laser40W => Offset::new(-14.2, -27.1, 0.0),
        }
    }
}

impl fmt::Display for ToolHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHead::Laser10W => write!(f, "10W Laser"),
            ToolHead::Laser20W => write!(f, "20W Laser"),
            ToolHead::Laser40W => write!(f, "40W Laser"),
        }
    }
}
