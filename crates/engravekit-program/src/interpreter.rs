//! Plain program interpretation: timing and bounding boxes
//!
//! Interpretation is line-oriented. `G0`/`G1` lines move; their
//! duration is Euclidean distance divided by feed (units/min) times
//! 60. Every command occupies at least [`MIN_COMMAND_SECS`] so that
//! zero-length and passthrough lines still take a scheduling slot.

use crate::command::{MotionCommand, MotionKind};
use engravekit_core::{ProgramError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Minimum duration of any command, in seconds.
pub const MIN_COMMAND_SECS: f64 = 0.01;

/// Feed rate assumed until the first `F` word appears, units/min.
const DEFAULT_FEED: f64 = 6000.0;

/// Axis-aligned bounding box over the points a program visits.
///
/// The implicit starting point (0,0,0) of the local frame is always
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// X min/max
    pub x: (f64, f64),
    /// Y min/max
    pub y: (f64, f64),
    /// Z min/max
    pub z: (f64, f64),
}

impl Bounds {
    /// Bounds containing only the local-frame origin.
    pub fn at_origin() -> Self {
        Self {
            x: (0.0, 0.0),
            y: (0.0, 0.0),
            z: (0.0, 0.0),
        }
    }

    /// Grow the bounds to include a point.
    pub fn include(&mut self, x: f64, y: f64, z: f64) {
        self.x = (self.x.0.min(x), self.x.1.max(x));
        self.y = (self.y.0.min(y), self.y.1.max(y));
        self.z = (self.z.0.min(z), self.z.1.max(z));
    }

    /// The union of two bounding boxes.
    pub fn union(&self, other: &Bounds) -> Self {
        Self {
            x: (self.x.0.min(other.x.0), self.x.1.max(other.x.1)),
            y: (self.y.0.min(other.y.0), self.y.1.max(other.y.1)),
            z: (self.z.0.min(other.z.0), self.z.1.max(other.z.1)),
        }
    }

    /// These bounds translated by a vector.
    pub fn shifted(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            x: (self.x.0 + dx, self.x.1 + dx),
            y: (self.y.0 + dy, self.y.1 + dy),
            z: (self.z.0 + dz, self.z.1 + dz),
        }
    }

    /// Whether the box has no Z extent.
    pub fn is_flat(&self) -> bool {
        self.z.0 == self.z.1
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::at_origin()
    }
}

/// An interpreted plain motion program.
///
/// `time_list` runs parallel to `commands`; `process_time` is its sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Display name, usually the file name
    pub name: String,
    /// Commands in program order
    pub commands: Vec<MotionCommand>,
    /// Estimated duration of each command, seconds
    pub time_list: Vec<f64>,
    /// Bounding box over all visited points
    pub bounds: Bounds,
    /// Total estimated duration, seconds
    pub process_time: f64,
}

impl Program {
    /// Interpret program text.
    ///
    /// Blank lines and `;` comments are skipped. Lines that are not
    /// `G0`/`G1` become passthrough commands with the minimum
    /// duration.
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut commands = Vec::new();
        let mut time_list = Vec::new();
        let mut bounds = Bounds::at_origin();

        let (mut x, mut y, mut z) = (0.0_f64, 0.0_f64, 0.0_f64);
        let mut feed = DEFAULT_FEED;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let kind = motion_kind(line);
            if kind == MotionKind::Passthrough {
                commands.push(MotionCommand {
                    raw: line.to_string(),
                    kind,
                    x,
                    y,
                    z,
                    feed,
                });
                time_list.push(MIN_COMMAND_SECS);
                continue;
            }

            let (mut nx, mut ny, mut nz) = (x, y, z);
            for word in line.split_whitespace() {
                let Some(value) = word.get(1..).and_then(|v| v.parse::<f64>().ok()) else {
                    continue;
                };
                match word.as_bytes()[0] {
                    b'X' | b'x' => nx = value,
                    b'Y' | b'y' => ny = value,
                    b'Z' | b'z' => nz = value,
                    b'F' | b'f' => feed = value,
                    _ => {}
                }
            }

            let distance =
                ((x - nx).powi(2) + (y - ny).powi(2) + (z - nz).powi(2)).sqrt();
            let seconds = (distance / feed * 60.0).max(MIN_COMMAND_SECS);

            bounds.include(nx, ny, nz);
            commands.push(MotionCommand {
                raw: line.to_string(),
                kind,
                x: nx,
                y: ny,
                z: nz,
                feed,
            });
            time_list.push(seconds);

            x = nx;
            y = ny;
            z = nz;
        }

        let process_time = time_list.iter().sum();
        Self {
            name: name.into(),
            commands,
            time_list,
            bounds,
            process_time,
        }
    }

    /// Read and interpret a program file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProgramError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::debug!("interpreted program {} from {}", name, path.display());
        Ok(Self::parse(name, &text))
    }

    /// Number of commands in the program.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the program has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn motion_kind(line: &str) -> MotionKind {
    let mnemonic = line.split_whitespace().next().unwrap_or("");
    match mnemonic {
        "G0" | "G00" => MotionKind::Rapid,
        "G1" | "G01" => MotionKind::Linear,
        _ => MotionKind::Passthrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let program = Program::parse("t", "; header\n\nG0 X10 F6000\n  \n;tail\n");
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn axes_and_feed_persist_across_lines() {
        let program = Program::parse("t", "G0 X10 Y5 F600\nG1 Z2\n");
        let last = &program.commands[1];
        assert_eq!(last.x, 10.0);
        assert_eq!(last.y, 5.0);
        assert_eq!(last.z, 2.0);
        assert_eq!(last.feed, 600.0);
    }

    #[test]
    fn duration_is_distance_over_feed() {
        // 10 units at 6000 units/min = 0.1 s
        let program = Program::parse("t", "G0 X10 F6000\n");
        assert!((program.time_list[0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn zero_length_moves_get_minimum_slot() {
        let program = Program::parse("t", "G1 F1200\nM3 S200\n");
        assert_eq!(program.time_list, vec![MIN_COMMAND_SECS, MIN_COMMAND_SECS]);
    }

    #[test]
    fn passthrough_keeps_raw_line() {
        let program = Program::parse("t", "M8\nG4 P100\n");
        assert_eq!(program.commands[0].kind, MotionKind::Passthrough);
        assert_eq!(program.commands[0].raw, "M8");
        assert_eq!(program.commands[1].raw, "G4 P100");
    }

    #[test]
    fn bounds_include_implicit_start() {
        let program = Program::parse("t", "G0 X10 Y10 F6000\nG1 X20 Y-5 Z3 F600\n");
        assert_eq!(program.bounds.x, (0.0, 20.0));
        assert_eq!(program.bounds.y, (-5.0, 10.0));
        assert_eq!(program.bounds.z, (0.0, 3.0));
    }

    #[test]
    fn process_time_is_sum_of_time_list() {
        let program = Program::parse(
            "t",
            "G0 X10 F6000\nG1 Y10 F600\nM3\nG1 X0 Y0 F600\n",
        );
        let sum: f64 = program.time_list.iter().sum();
        assert!((program.process_time - sum).abs() < 1e-12);
    }

    #[test]
    fn g00_g01_variants_are_moves() {
        let program = Program::parse("t", "G00 X5 F6000\nG01 Y5 F6000\n");
        assert_eq!(program.commands[0].kind, MotionKind::Rapid);
        assert_eq!(program.commands[1].kind, MotionKind::Linear);
    }
}
