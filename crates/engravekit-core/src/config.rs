//! Connection and machine configuration
//!
//! Settings persistence lives outside this engine; these structs are
//! the validated, in-memory view handed to the controller.

use crate::data::Axis;
use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};

/// Transport selection for the machine link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionDriver {
    /// USB/RS-232 serial link
    #[default]
    Serial,
    /// TCP stream socket
    Tcp,
}

/// Parameters for opening the machine link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Which transport to use
    pub driver: ConnectionDriver,
    /// Serial port name (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Host name or IP for TCP connections
    pub host: String,
    /// TCP port number
    pub tcp_port: u16,
    /// Read timeout per transport read, in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: String::new(),
            baud_rate: 115_200,
            host: String::new(),
            tcp_port: 8888,
            timeout_ms: 50,
        }
    }
}

impl ConnectionParams {
    /// The endpoint this configuration points at, for display.
    pub fn endpoint(&self) -> String {
        match self.driver {
            ConnectionDriver::Serial => self.port.clone(),
            ConnectionDriver::Tcp => format!("{}:{}", self.host, self.tcp_port),
        }
    }
}

/// Machine behavior configuration.
///
/// Speeds are in length units per second; the wire format multiplies
/// by 60 to produce feed rates in units per minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Position poll loop interval in milliseconds
    pub poll_interval_ms: u64,
    /// Continuous jog command cadence in milliseconds
    pub jog_interval_ms: u64,
    /// Hard cap for any move touching the Z axis, units/s
    pub z_max_speed: f64,
    /// Speed used for job travel moves, units/s
    pub travel_speed: f64,
    /// Accepted manual speed range, units/s
    pub speed_range: (f64, f64),
    /// Accepted step-move distance range, units
    pub step_range: (f64, f64),
    /// Run the homing cycle as part of connect
    pub home_on_connect: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            jog_interval_ms: 100,
            z_max_speed: 30.0,
            travel_speed: 30.0,
            speed_range: (0.1, 100.0),
            step_range: (0.01, 500.0),
            home_on_connect: true,
        }
    }
}

impl MachineConfig {
    /// Validate a manual move speed against the configured range.
    pub fn validate_speed(&self, speed: f64) -> Result<()> {
        let (min, max) = self.speed_range;
        if !speed.is_finite() || speed < min || speed > max {
            return Err(DeviceError::OutOfRange {
                what: "speed".to_string(),
                value: speed,
                min,
                max,
            }
            .into());
        }
        Ok(())
    }

    /// Validate a step-move distance against the configured range.
    pub fn validate_step(&self, distance: f64) -> Result<()> {
        let (min, max) = self.step_range;
        if !distance.is_finite() || distance < min || distance > max {
            return Err(DeviceError::OutOfRange {
                what: "step width".to_string(),
                value: distance,
                min,
                max,
            }
            .into());
        }
        Ok(())
    }

    /// Clamp a speed for a move that touches the given axis.
    pub fn clamp_axis_speed(&self, axis: Axis, speed: f64) -> f64 {
        match axis {
            Axis::Z => speed.min(self.z_max_speed),
            _ => speed,
        }
    }

    /// Clamp a speed for a coordinated move that touches Z.
    pub fn clamp_z_speed(&self, speed: f64) -> f64 {
        speed.min(self.z_max_speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_validation() {
        let config = MachineConfig::default();
        assert!(config.validate_speed(30.0).is_ok());
        assert!(config.validate_speed(0.0).is_err());
        assert!(config.validate_speed(1e9).is_err());
        assert!(config.validate_speed(f64::NAN).is_err());
    }

    #[test]
    fn z_speed_clamp() {
        let config = MachineConfig::default();
        assert_eq!(config.clamp_axis_speed(Axis::Z, 100.0), 30.0);
        assert_eq!(config.clamp_axis_speed(Axis::X, 100.0), 100.0);
        assert_eq!(config.clamp_z_speed(12.0), 12.0);
    }

    #[test]
    fn params_endpoint_display() {
        let mut params = ConnectionParams {
            port: "/dev/ttyACM0".to_string(),
            ..Default::default()
        };
        assert_eq!(params.endpoint(), "/dev/ttyACM0");
        params.driver = ConnectionDriver::Tcp;
        params.host = "10.0.0.5".to_string();
        assert_eq!(params.endpoint(), "10.0.0.5:8888");
    }
}
