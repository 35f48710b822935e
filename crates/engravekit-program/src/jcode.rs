//! J-code wrapper expansion
//!
//! A J-code file composes one job step out of plain motion programs:
//! `J0 X.. Y.. Z.. R..` declares a local work offset, `J1 <path>`
//! references a plain program executed relative to the most recent
//! offset. Referenced paths resolve relative to the J-code file's
//! directory. A plain program file loads as a single zero-offset
//! reference, so the job engine only ever deals with [`JobProgram`].

use crate::interpreter::{Bounds, Program};
use engravekit_core::{ProgramError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Local work offset declared by a `J0` line.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalOffset {
    /// X shift, length units
    pub x: f64,
    /// Y shift, length units
    pub y: f64,
    /// Z shift, length units
    pub z: f64,
    /// Rotary angle, degrees
    pub r: f64,
}

impl LocalOffset {
    /// Whether the linear components are all zero.
    pub fn is_zero_linear(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Euclidean length of the linear components.
    pub fn linear_magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One referenced program together with its local offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRef {
    /// The interpreted plain program
    pub program: Program,
    /// Offset applied before the program runs
    pub offset: LocalOffset,
}

/// The fully expanded program of one job step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgram {
    /// Display name, usually the top-level file name
    pub name: String,
    /// Referenced programs in execution order
    pub refs: Vec<ProgramRef>,
    /// Combined bounding box across all references, offset-shifted
    pub bounds: Bounds,
    /// Min/max rotary angle across declared offsets, if any
    pub rotary_range: Option<(f64, f64)>,
    /// Total estimated duration, seconds
    pub process_time: f64,
}

impl JobProgram {
    /// Wrap a single plain program at zero offset.
    pub fn from_program(program: Program) -> Self {
        let name = program.name.clone();
        let bounds = program.bounds;
        let process_time = program.process_time;
        Self {
            name,
            refs: vec![ProgramRef {
                program,
                offset: LocalOffset::default(),
            }],
            bounds,
            rotary_range: None,
            process_time,
        }
    }

    /// Load a program file, choosing the format by content: any line
    /// starting with `J0` or `J1` makes it a J-code wrapper.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProgramError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let is_jcode = text.lines().any(|line| {
            let line = line.trim();
            line.starts_with("J0") || line.starts_with("J1")
        });

        if is_jcode {
            Self::parse_jcode(path, &text)
        } else {
            Ok(Self::from_program(Program::parse(
                file_name(path),
                &text,
            )))
        }
    }

    fn parse_jcode(path: &Path, text: &str) -> Result<Self> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut refs: Vec<ProgramRef> = Vec::new();
        let mut offset = LocalOffset::default();
        let mut rotary_range: Option<(f64, f64)> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let line_number = idx + 1;

            if let Some(rest) = line.strip_prefix("J0") {
                offset = parse_offset(rest, line_number)?;
                rotary_range = Some(match rotary_range {
                    Some((lo, hi)) => (lo.min(offset.r), hi.max(offset.r)),
                    None => (offset.r, offset.r),
                });
            } else if let Some(rest) = line.strip_prefix("J1") {
                let reference = rest.trim();
                if reference.is_empty() {
                    return Err(ProgramError::MalformedLine {
                        line_number,
                        reason: "J1 without a program path".to_string(),
                    }
                    .into());
                }
                let full = base.join(reference);
                if !full.exists() {
                    return Err(ProgramError::MissingReference {
                        path: full.display().to_string(),
                    }
                    .into());
                }
                let program = Program::from_file(&full)?;
                refs.push(ProgramRef { program, offset });
            } else {
                return Err(ProgramError::MalformedLine {
                    line_number,
                    reason: format!("unexpected line in J-code file: {}", line),
                }
                .into());
            }
        }

        let mut bounds: Option<Bounds> = None;
        let mut process_time = 0.0;
        for r in &refs {
            let shifted = r.program.bounds.shifted(r.offset.x, r.offset.y, r.offset.z);
            bounds = Some(match bounds {
                Some(b) => b.union(&shifted),
                None => shifted,
            });
            process_time += r.program.process_time;
        }

        Ok(Self {
            name: file_name(path),
            refs,
            bounds: bounds.unwrap_or_default(),
            rotary_range,
            process_time,
        })
    }

    /// Total number of commands across all references.
    pub fn command_count(&self) -> usize {
        self.refs.iter().map(|r| r.program.len()).sum()
    }
}

fn parse_offset(rest: &str, line_number: usize) -> Result<LocalOffset> {
    let mut offset = LocalOffset::default();
    for word in rest.split_whitespace() {
        let value = word
            .get(1..)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| ProgramError::MalformedLine {
                line_number,
                reason: format!("bad J0 word: {}", word),
            })?;
        match word.as_bytes()[0] {
            b'X' | b'x' => offset.x = value,
            b'Y' | b'y' => offset.y = value,
            b'Z' | b'z' => offset.z = value,
            b'R' | b'r' => offset.r = value,
            _ => {
                return Err(ProgramError::MalformedLine {
                    line_number,
                    reason: format!("unknown J0 word: {}", word),
                }
                .into())
            }
        }
    }
    Ok(offset)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
