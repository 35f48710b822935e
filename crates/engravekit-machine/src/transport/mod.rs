//! Byte transports and the command link
//!
//! A [`Transport`] moves newline-framed text over serial or TCP. The
//! [`CommandLink`] sits on top: it serializes access to the wire, sends
//! one command at a time, and collects the response block up to the
//! `ok` acknowledgment sentinel.

mod serial;
mod tcp;

pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use engravekit_core::{ConnectionError, ConnectionParams, Result};
use parking_lot::Mutex;

/// Acknowledgment sentinel terminating every response block.
pub const ACK: &str = "ok";

/// Hard cap on response lines collected for a single command.
pub const MAX_RESPONSE_LINES: usize = 1000;

/// Consecutive empty reads tolerated before giving up on the ack.
const MAX_IDLE_READS: usize = 100;

/// A line-oriented byte transport to the machine.
///
/// Implementations block for at most the configured read timeout per
/// `read_line` call and return `Ok(None)` when no complete line
/// arrived in that window.
pub trait Transport: Send {
    /// Open the transport using the given parameters.
    fn open(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Close the transport. Closing a closed transport is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;

    /// Write one command line. The trailing newline is appended here.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read one response line, or `None` if the read timed out.
    fn read_line(&mut self) -> Result<Option<String>>;
}

/// Serialized command/response access to a [`Transport`].
///
/// Holding the lock for the full send-and-collect cycle guarantees
/// that concurrent callers (poll loop, jog task, job worker) never
/// interleave their commands on the wire.
pub struct CommandLink {
    transport: Mutex<Box<dyn Transport>>,
}

impl CommandLink {
    /// Wrap a transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Open the underlying transport.
    pub fn connect(&self, params: &ConnectionParams) -> Result<()> {
        self.transport.lock().open(params)
    }

    /// Close the underlying transport.
    pub fn disconnect(&self) -> Result<()> {
        self.transport.lock().close()
    }

    /// Whether the underlying transport is open.
    pub fn is_open(&self) -> bool {
        self.transport.lock().is_open()
    }

    /// Send a command and, when `wait_ack` is set, collect its
    /// response block.
    ///
    /// The returned lines exclude the `ok` sentinel. A missing
    /// acknowledgment is logged, never raised: whether the response
    /// stops arriving or grows past [`MAX_RESPONSE_LINES`], the caller
    /// still receives the lines collected so far, matching firmware
    /// that occasionally swallows an acknowledgment.
    ///
    /// Without `wait_ack` a single best-effort read is attempted and
    /// whatever line it yields is returned.
    pub fn send(&self, command: &str, wait_ack: bool) -> Result<Vec<String>> {
        let mut transport = self.transport.lock();
        if !transport.is_open() {
            return Err(ConnectionError::NotConnected.into());
        }

        tracing::trace!("-> {}", command);
        transport.write_line(command)?;
        if !wait_ack {
            let mut lines = Vec::new();
            if let Ok(Some(line)) = transport.read_line() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(ACK) {
                    lines.push(trimmed.to_string());
                }
            }
            return Ok(lines);
        }

        let mut lines = Vec::new();
        let mut idle_reads = 0;
        loop {
            match transport.read_line()? {
                Some(line) => {
                    idle_reads = 0;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    tracing::trace!("<- {}", trimmed);
                    if trimmed.eq_ignore_ascii_case(ACK) {
                        return Ok(lines);
                    }
                    lines.push(trimmed.to_string());
                    if lines.len() >= MAX_RESPONSE_LINES {
                        tracing::warn!(
                            "no acknowledgment for {} within {} lines",
                            command,
                            MAX_RESPONSE_LINES
                        );
                        return Ok(lines);
                    }
                }
                None => {
                    idle_reads += 1;
                    if idle_reads >= MAX_IDLE_READS {
                        tracing::warn!("no acknowledgment for {}", command);
                        return Ok(lines);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeTransport {
        open: bool,
        sent: Vec<String>,
        responses: VecDeque<Option<String>>,
    }

    impl FakeTransport {
        fn with_responses(lines: &[&str]) -> Self {
            Self {
                open: true,
                sent: Vec::new(),
                responses: lines.iter().map(|l| Some(l.to_string())).collect(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn open(&mut self, _params: &ConnectionParams) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn write_line(&mut self, line: &str) -> Result<()> {
            self.sent.push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> Result<Option<String>> {
            Ok(self.responses.pop_front().unwrap_or(None))
        }
    }

    #[test]
    fn collects_lines_until_ack() {
        let transport = FakeTransport::with_responses(&["X:1.0 Y:2.0 Z:3.0", "ok"]);
        let link = CommandLink::new(Box::new(transport));
        let lines = link.send("M114", true).unwrap();
        assert_eq!(lines, vec!["X:1.0 Y:2.0 Z:3.0"]);
    }

    #[test]
    fn ack_is_case_insensitive_and_blank_lines_skipped() {
        let transport = FakeTransport::with_responses(&["", "  info  ", "OK"]);
        let link = CommandLink::new(Box::new(transport));
        let lines = link.send("M1005", true).unwrap();
        assert_eq!(lines, vec!["info"]);
    }

    #[test]
    fn fire_and_forget_takes_one_best_effort_read() {
        let transport = FakeTransport::with_responses(&["status", "left unread"]);
        let link = CommandLink::new(Box::new(transport));
        let lines = link.send("M112", false).unwrap();
        assert_eq!(lines, vec!["status"]);
    }

    #[test]
    fn fire_and_forget_tolerates_silence() {
        let transport = FakeTransport::with_responses(&[]);
        let link = CommandLink::new(Box::new(transport));
        let lines = link.send("M112", false).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn missing_ack_returns_partial_block() {
        let transport = FakeTransport::with_responses(&["partial"]);
        let link = CommandLink::new(Box::new(transport));
        let lines = link.send("M114", true).unwrap();
        assert_eq!(lines, vec!["partial"]);
    }

    #[test]
    fn send_on_closed_link_is_rejected() {
        let mut transport = FakeTransport::with_responses(&[]);
        transport.open = false;
        let link = CommandLink::new(Box::new(transport));
        assert!(link.send("G28", true).is_err());
    }

    #[test]
    fn runaway_response_returns_the_capped_block() {
        let mut transport = FakeTransport::with_responses(&[]);
        for _ in 0..MAX_RESPONSE_LINES + 10 {
            transport.responses.push_back(Some("noise".to_string()));
        }
        let link = CommandLink::new(Box::new(transport));
        let lines = link.send("M114", true).unwrap();
        assert_eq!(lines.len(), MAX_RESPONSE_LINES);
    }
}
