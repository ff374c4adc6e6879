use anyhow::{Context, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, warn};

use crate::config::SerialSettings;

/// A serial port the receiver can listen on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Open the link described by `settings` as a blocking byte stream.
///
/// Reads block until data arrives or `read_timeout` elapses, in which case
/// they fail with `TimedOut`.
pub fn open(settings: &SerialSettings) -> Result<Box<dyn SerialPort>> {
    debug!(
        port = %settings.port,
        baud = settings.baud_rate,
        timeout = ?settings.read_timeout,
        "opening serial port"
    );

    serialport::new(&settings.port, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.read_timeout)
        .open()
        .with_context(|| format!("Unable to open port {}", settings.port))
}

/// Enumerate serial ports present on this machine
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;

    if ports.is_empty() {
        warn!("No serial ports detected. Is your device connected?");
    }

    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            description: describe(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb
                .product
                .as_deref()
                .or(usb.manufacturer.as_deref())
                .unwrap_or("USB serial");
            format!("{} ({:04x}:{:04x})", product, usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "serial".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_describe_usb_port() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x10c4,
            pid: 0xea60,
            serial_number: None,
            manufacturer: Some("Silicon Labs".to_string()),
            product: None,
        });
        assert_eq!(describe(&usb), "Silicon Labs (10c4:ea60)");
        assert_eq!(describe(&SerialPortType::PciPort), "PCI serial");
    }

    #[test]
    fn test_open_missing_port_fails() {
        let settings = SerialSettings::new("/dev/filerelay-no-such-port");
        let err = open(&settings).err().expect("opening a missing port should fail");
        assert!(err.to_string().contains("Unable to open port"));
    }
}
