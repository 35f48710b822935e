//! # EngraveKit Program
//!
//! Pure, stateless interpretation of engraving programs. No device
//! access happens here: the interpreter turns G-code/J-code text into
//! a command list with precomputed per-command durations and an
//! axis-aligned bounding box, which the job engine consumes for
//! scheduling and ETA tracking.
//!
//! Two file formats are understood:
//! - plain motion programs: one command per line, `G0`/`G1` moves are
//!   interpreted, everything else passes through verbatim;
//! - J-code wrappers: `J0` lines declare a local work offset and `J1`
//!   lines reference plain program files, composing one job step out
//!   of several programs at different offsets.

pub mod command;
pub mod interpreter;
pub mod jcode;

pub use command::{MotionCommand, MotionKind};
pub use interpreter::{Bounds, Program, MIN_COMMAND_SECS};
pub use jcode::{JobProgram, LocalOffset, ProgramRef};
