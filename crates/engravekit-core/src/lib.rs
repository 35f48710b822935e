//! # EngraveKit Core
//!
//! Core types, events, and errors for EngraveKit.
//! Provides the fundamental abstractions shared by the program
//! interpreter, the motion controller, and the job execution engine.

pub mod config;
pub mod data;
pub mod error;
pub mod event;

pub use config::{ConnectionDriver, ConnectionParams, MachineConfig};
pub use data::{Axis, MachineState, Offset, Position, ProcessState, ToolHead};
pub use error::{
    ConnectionError, DeviceError, Error, JobError, ProgramError, ProtocolError, Result,
};
pub use event::{format_eta, EventDispatcher, MachineEvent};
