//! Motion command model

use serde::{Deserialize, Serialize};

/// Kind of a single program command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionKind {
    /// `G0` rapid move
    Rapid,
    /// `G1` linear move
    Linear,
    /// Any other line, forwarded to the machine verbatim
    Passthrough,
}

/// One program command with its resolved target.
///
/// Targets are absolute within the program's local frame. Axes not
/// named on the line retain the previous command's value; the feed
/// rate persists across lines the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    /// The raw line as sent to the machine
    pub raw: String,
    /// Command kind
    pub kind: MotionKind,
    /// Target X in the program's local frame
    pub x: f64,
    /// Target Y in the program's local frame
    pub y: f64,
    /// Target Z in the program's local frame
    pub z: f64,
    /// Feed rate in units per minute
    pub feed: f64,
}

impl MotionCommand {
    /// Whether this command produces motion that the interpreter timed.
    pub fn is_move(&self) -> bool {
        matches!(self.kind, MotionKind::Rapid | MotionKind::Linear)
    }
}
