//! Serial transport
//!
//! Blocking serial I/O with a short read timeout. Reads accumulate
//! into a pending buffer until a full newline-terminated line is
//! available, so partial frames survive across timeout boundaries.

use super::Transport;
use engravekit_core::{ConnectionError, ConnectionParams, Result};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// USB/RS-232 serial transport.
#[derive(Default)]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Create a closed serial transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// List serial port names available on this host.
    pub fn available_ports() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }

    fn take_pending_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, params: &ConnectionParams) -> Result<()> {
        if self.port.is_some() {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if params.port.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "no serial port selected".to_string(),
            }
            .into());
        }
        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .open()
            .map_err(|e| ConnectionError::OpenFailed {
                endpoint: params.port.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!("opened serial port {} @ {}", params.port, params.baud_rate);
        self.port = Some(port);
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle releases the port.
        self.port = None;
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or(ConnectionError::NotConnected)?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.take_pending_line() {
            return Ok(Some(line));
        }
        let port = self
            .port
            .as_mut()
            .ok_or(ConnectionError::NotConnected)?;
        let mut buf = [0u8; 256];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(self.take_pending_line())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => {
                self.port = None;
                Err(ConnectionError::ConnectionLost {
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }
}
