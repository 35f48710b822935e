//! # EngraveKit
//!
//! A motion control and job execution engine for laser engraving
//! machines, with support for:
//! - Serial (USB) and TCP/IP connectivity
//! - G-code interpretation with timing and bounding-box estimation
//! - J-code job composition (offset programs around a rotary axis)
//! - Queued multi-step jobs with pause, resume, and cancel
//! - Rotary motors on a separate servo bus
//!
//! ## Architecture
//!
//! EngraveKit is organized as a workspace with multiple crates:
//!
//! 1. **engravekit-core** - Core types, configuration, errors, events
//! 2. **engravekit-program** - G-code/J-code interpretation
//! 3. **engravekit-machine** - Transports, motion controller, rotary
//!    subsystem, job execution engine
//! 4. **engravekit** - This facade, re-exporting the public API

pub use engravekit_core::{
    Axis, ConnectionDriver, ConnectionError, ConnectionParams, DeviceError, Error,
    EventDispatcher, JobError, MachineConfig, MachineEvent, MachineState, Offset, Position,
    ProcessState, ProgramError, ProtocolError, Result, ToolHead, format_eta,
};

pub use engravekit_program::{
    Bounds, JobProgram, LocalOffset, MotionCommand, MotionKind, Program, ProgramRef,
    MIN_COMMAND_SECS,
};

pub use engravekit_machine::{
    CommandLink, Direction, JobEngine, JobMotion, JobStep, MotionController, MoveMode,
    ProcessControl, RotaryController, ScsSerialBus, SerialTransport, ServoBus, TcpTransport,
    Transport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with console output, `RUST_LOG`
/// environment variable support, and INFO as the default level.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
