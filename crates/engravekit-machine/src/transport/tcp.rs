//! TCP transport
//!
//! Some machines expose the same line protocol over a TCP service on
//! the local network. A zero-byte read means the peer closed the
//! socket, which surfaces as a lost connection rather than a timeout.

use super::Transport;
use engravekit_core::{ConnectionError, ConnectionParams, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// TCP stream transport.
#[derive(Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl TcpTransport {
    /// Create a closed TCP transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn take_pending_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, params: &ConnectionParams) -> Result<()> {
        if self.stream.is_some() {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if params.host.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "no host configured".to_string(),
            }
            .into());
        }
        let endpoint = format!("{}:{}", params.host, params.tcp_port);
        let addr = endpoint
            .to_socket_addrs()
            .map_err(|e| ConnectionError::OpenFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ConnectionError::OpenFailed {
                endpoint: endpoint.clone(),
                reason: "address did not resolve".to_string(),
            })?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(3)).map_err(|e| {
            ConnectionError::OpenFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        stream.set_read_timeout(Some(Duration::from_millis(params.timeout_ms)))?;
        stream.set_nodelay(true)?;
        tracing::debug!("opened tcp stream to {}", endpoint);
        self.stream = Some(stream);
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(ConnectionError::NotConnected)?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.take_pending_line() {
            return Ok(Some(line));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or(ConnectionError::NotConnected)?;
        let mut buf = [0u8; 256];
        match stream.read(&mut buf) {
            Ok(0) => {
                // Peer closed the socket.
                self.stream = None;
                Err(ConnectionError::ConnectionLost {
                    reason: "peer closed the connection".to_string(),
                }
                .into())
            }
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(self.take_pending_line())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => {
                self.stream = None;
                Err(ConnectionError::ConnectionLost {
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }
}
