//! Physical serial port connection and device discovery.
//!
//! Wraps the `serialport` crate. The port is opened once by [`connect`] and its
//! handle is released when the [`SerialPortConnection`] is dropped;
//! [`SerialPortConnection::close`] drops it explicitly and logs the close.
//!
//! Discovery matches a device *description*: the USB product string, falling back
//! to the manufacturer string. Non-USB ports have no description and never match
//! by name.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info};

use crate::error::{RobotError, RobotResult};
use crate::serial::{SerialConnection, DEFAULT_SERIAL_TIMEOUT};

/// Open serial port to the motion controller.
pub struct SerialPortConnection {
    port: Box<dyn SerialPort>,
    port_name: String,
}

impl SerialPortConnection {
    /// Open `port_name` at `baud_rate` with the default read timeout.
    pub fn open(port_name: &str, baud_rate: u32) -> RobotResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(DEFAULT_SERIAL_TIMEOUT)
            .open()?;
        debug!(port = port_name, baud_rate, "Serial port opened");
        Ok(Self {
            port,
            port_name: port_name.to_string(),
        })
    }

    /// Path of the underlying device.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Close the port by dropping its handle.
    ///
    /// Dropping the connection without calling this releases the port the same way.
    pub fn close(self) {
        let Self { port, port_name } = self;
        drop(port);
        debug!(port = %port_name, "Serial port closed");
    }
}

impl std::fmt::Debug for SerialPortConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortConnection")
            .field("port_name", &self.port_name)
            .finish()
    }
}

impl SerialConnection for SerialPortConnection {
    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> RobotResult<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }

    fn clear_input(&mut self) -> RobotResult<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> RobotResult<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

/// Open a connection to the motion controller.
///
/// Without an explicit `port`, the first attached device whose description contains
/// `device_name` is used.
pub fn connect(
    device_name: Option<&str>,
    port: Option<&str>,
    baud_rate: u32,
) -> RobotResult<SerialPortConnection> {
    let port_name = match port {
        Some(port) => port.to_string(),
        None => {
            let name = device_name.ok_or_else(|| {
                RobotError::precondition("either a device name or a port is required")
            })?;
            discover_by_name(name)?
                .into_iter()
                .next()
                .ok_or_else(|| RobotError::DeviceNotFound(format!("name {:?}", name)))?
        }
    };
    info!(device = ?device_name, port = %port_name, baud_rate, "Connecting to motion controller");
    SerialPortConnection::open(&port_name, baud_rate)
}

/// All attached ports whose description contains `device_name`.
pub fn discover_by_name(device_name: &str) -> RobotResult<Vec<String>> {
    Ok(filter_by_name(&serialport::available_ports()?, device_name))
}

/// First attached port with the given USB vendor ID.
pub fn discover_by_vendor_id(vid: u16) -> RobotResult<Option<String>> {
    Ok(first_by_vendor_id(&serialport::available_ports()?, vid))
}

/// Human-readable description of a port, if it has one.
pub fn description(info: &SerialPortInfo) -> Option<&str> {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .as_deref()
            .or(usb.manufacturer.as_deref()),
        _ => None,
    }
}

/// Ports among `ports` whose description contains `device_name`.
pub fn filter_by_name(ports: &[SerialPortInfo], device_name: &str) -> Vec<String> {
    ports
        .iter()
        .filter(|info| description(info).is_some_and(|d| d.contains(device_name)))
        .map(|info| info.port_name.clone())
        .collect()
}

/// First port among `ports` with vendor ID `vid`.
pub fn first_by_vendor_id(ports: &[SerialPortInfo], vid: u16) -> Option<String> {
    ports.iter().find_map(|info| match &info.port_type {
        SerialPortType::UsbPort(usb) if usb.vid == vid => Some(info.port_name.clone()),
        _ => None,
    })
}
