//! Machine link, motion controller, rotary subsystem, and job engine.
//!
//! The layering mirrors the wire protocol: [`transport`] moves bytes,
//! [`CommandLink`] frames commands and collects acknowledged response
//! blocks, [`MotionController`] owns machine state and coordinate
//! frames, and [`job`] executes queued steps on top of the controller.

pub mod controller;
pub mod job;
pub mod rotary;
pub mod transport;

pub use controller::{Direction, MotionController, MoveMode};
pub use job::{JobEngine, JobMotion, JobStep, ProcessControl};
pub use rotary::{RotaryController, ScsSerialBus, ServoBus};
pub use transport::{CommandLink, SerialTransport, TcpTransport, Transport};
