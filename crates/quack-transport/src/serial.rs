use crate::{PortInfo, Result, StreamTransport, TransportError};
use serialport::{ErrorKind, SerialPortType};
use std::time::Duration;

/// Read timeout; bounds how long shutdown waits on a quiet line.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

impl StreamTransport {
    pub fn open_serial(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                ErrorKind::NoDevice => TransportError::PortNotFound(path.to_string()),
                _ => TransportError::Io(e.to_string()),
            })?;
        let reader = port
            .try_clone()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self::from_io(path, Box::new(reader), Box::new(port)))
    }
}

pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let driver = match p.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .unwrap_or_else(|| format!("usb {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::BluetoothPort => "bluetooth".to_string(),
                SerialPortType::PciPort => "pci".to_string(),
                SerialPortType::Unknown => "serial".to_string(),
            };
            PortInfo {
                name: p.port_name,
                driver,
            }
        })
        .collect())
}
