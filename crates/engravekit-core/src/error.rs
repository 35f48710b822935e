//! Error handling for EngraveKit
//!
//! Provides error types for all layers of the engine:
//! - Connection errors (transport open/liveness)
//! - Protocol errors (framing, response parsing)
//! - Device errors (tool head, rotary motors, gating)
//! - Job errors (queue validation, worker execution)
//! - Program errors (G-code/J-code file interpretation)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Errors related to opening and probing the machine link,
/// for both serial and TCP transports.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// No connection is established
    #[error("Not connected to the machine")]
    NotConnected,

    /// A connection already exists
    #[error("Already connected to the machine")]
    AlreadyConnected,

    /// Failed to open the transport
    #[error("Failed to open {endpoint}: {reason}")]
    OpenFailed {
        /// Port name or host:port that failed to open.
        endpoint: String,
        /// The underlying failure description.
        reason: String,
    },

    /// Connection parameters are incomplete or inconsistent
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// Why the parameters were rejected.
        reason: String,
    },

    /// The link went away mid-operation
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The underlying failure description.
        reason: String,
    },
}

/// Protocol error type
///
/// Errors in the line-oriented command/response framing. Note that a
/// missing acknowledgment sentinel is deliberately *not* represented
/// here: the protocol layer logs it and returns the lines collected
/// so far (see the command link documentation).
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// A response could not be interpreted
    #[error("Failed to parse response: {response}")]
    ParseError {
        /// The offending response text.
        response: String,
    },

    /// The machine reported no position in its status block
    #[error("No position report in response")]
    MissingPosition,
}

/// Device error type
///
/// Errors related to the attached hardware: tool head identification,
/// rotary motors, and operations rejected by the run-state gate.
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    /// The tool head could not be matched to a known identity
    #[error("Unsupported tool head (identification returned {lines} lines)")]
    UnknownToolHead {
        /// Number of lines in the identification response.
        lines: usize,
    },

    /// A rotary motor id is not present on the bus
    #[error("Rotary motor {id} not found")]
    MotorNotFound {
        /// The missing motor id.
        id: u8,
    },

    /// The operation is blocked while a job is running
    #[error("Machine is busy running a job: {operation} rejected")]
    Busy {
        /// The rejected operation name.
        operation: String,
    },

    /// A numeric parameter is outside its configured range
    #[error("{what} {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// The parameter name.
        what: String,
        /// The rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
}

/// Job error type
///
/// Errors from the job execution engine: queue validation on start
/// and faults caught at the worker boundary.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Start was requested with an empty queue
    #[error("No process steps defined")]
    QueueEmpty,

    /// A step is missing its program or work position
    #[error("Process step {index} is incomplete: {reason}")]
    StepIncomplete {
        /// Zero-based index of the offending step.
        index: usize,
        /// What is missing.
        reason: String,
    },

    /// The requested transition is invalid from the current state
    #[error("Invalid while process state is {state}: {operation}")]
    InvalidState {
        /// The current process state name.
        state: String,
        /// The rejected operation.
        operation: String,
    },

    /// An unknown step id was referenced
    #[error("Unknown process step")]
    UnknownStep,

    /// A fault occurred inside the execution worker
    #[error("Execution failed: {message}")]
    Execution {
        /// Description of the fault.
        message: String,
    },
}

/// Program error type
///
/// Errors raised by the G-code/J-code interpreter.
#[derive(Error, Debug, Clone)]
pub enum ProgramError {
    /// A program file could not be read
    #[error("Failed to read {path}: {reason}")]
    FileRead {
        /// The file path.
        path: String,
        /// The underlying failure description.
        reason: String,
    },

    /// A J-code line could not be interpreted
    #[error("Malformed J-code at line {line_number}: {reason}")]
    MalformedLine {
        /// One-based line number.
        line_number: usize,
        /// Why the line was rejected.
        reason: String,
    },

    /// A J1 reference names a file that does not exist
    #[error("Referenced program not found: {path}")]
    MissingReference {
        /// The referenced path.
        path: String,
    },
}

/// Main error type for EngraveKit
///
/// A unified error type representing any failure from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Device error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Job error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Program interpretation error
    #[error(transparent)]
    Program(#[from] ProgramError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this error means the machine was busy running a job
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Device(DeviceError::Busy { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
