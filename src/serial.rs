use crate::channel::Channel;
use crate::consts::INBOUND_CHANNEL_CAPACITY;
use crate::error::AppError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

const READ_TIMEOUT: Duration = Duration::from_millis(250);
const READ_BUF_SZ: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    /// usb, pci, bluetooth or unknown
    pub kind: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo {
            name: info.port_name,
            kind: "unknown".to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                port.kind = "usb".to_string();
                port.vid = Some(usb.vid);
                port.pid = Some(usb.pid);
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
                port.serial_number = usb.serial_number;
            }
            SerialPortType::PciPort => port.kind = "pci".to_string(),
            SerialPortType::BluetoothPort => port.kind = "bluetooth".to_string(),
            SerialPortType::Unknown => (),
        }
        port
    }
}

/// Every serial port the OS reports, whether or not a modem is attached.
pub fn list_ports() -> Result<Vec<PortInfo>, AppError> {
    let ports = serialport::available_ports().map_err(|e| {
        error!(error=%e, "failed to enumerate serial ports");
        AppError::Serial(e)
    })?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// A modem attached to a local serial port.
pub struct SerialChannel {
    port_name: String,
    port: Box<dyn SerialPort>,
    subscribed: bool,
}

impl SerialChannel {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, AppError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                error!(port=%port_name, error=%e, "failed to open serial port");
                AppError::Serial(e)
            })?;
        debug!(port=%port_name, baud_rate, "opened serial port");
        Ok(Self {
            port_name: port_name.to_string(),
            port,
            subscribed: false,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Run a blocking operation on a port handle off the runtime.
async fn run_blocking<F>(port_name: &str, mut port: Box<dyn SerialPort>, op: F) -> Result<(), AppError>
where
    F: FnOnce(&mut dyn SerialPort) -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(port.as_mut()))
        .await
        .map_err(|e| {
            error!(error=%e, "serial port task failed");
            AppError::ChannelClosed("serial port task")
        })?
        .map_err(|e| {
            error!(port=%port_name, error=%e, "serial port i/o failed");
            AppError::Io(e)
        })
}

#[async_trait]
impl Channel for SerialChannel {
    async fn write(&mut self, command: &str) -> Result<(), AppError> {
        trace!(port=%self.port_name, command=?command, "writing command");
        let bytes = command.as_bytes().to_vec();
        let port = self.port.try_clone()?;
        run_blocking(&self.port_name, port, move |port| port.write_all(&bytes)).await
    }

    async fn drain(&mut self) -> Result<(), AppError> {
        let port = self.port.try_clone()?;
        // flush waits for the output queue to be transmitted
        run_blocking(&self.port_name, port, |port| port.flush()).await
    }

    fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, AppError> {
        if self.subscribed {
            return Err(AppError::AlreadySubscribed);
        }
        let port = self.port.try_clone()?;
        let (inbound_sink, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let port_name = self.port_name.clone();
        thread::Builder::new()
            .name(format!("serial-reader {}", self.port_name))
            .spawn(move || read_port(port_name, port, inbound_sink))?;
        self.subscribed = true;
        Ok(inbound)
    }
}

/// Reader loop; forwards each read as one chunk until the receiver goes away
/// or the port fails.
fn read_port<R: Read>(port_name: String, mut port: R, sink: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_BUF_SZ];
    loop {
        let idle = match port.read(&mut buf) {
            Ok(0) => true,
            Ok(n) => {
                if sink.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!(port=%port_name, "inbound receiver dropped; stopping reader");
                    break;
                }
                false
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
            Err(e) => {
                error!(port=%port_name, error=%e, "failed to read from serial port");
                break;
            }
        };
        if idle && sink.is_closed() {
            debug!(port=%port_name, "inbound receiver dropped; stopping reader");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pci_port_info() {
        let info = PortInfo::from(SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::PciPort,
        });
        assert_eq!(info.name, "/dev/ttyS0");
        assert_eq!(info.kind, "pci");
        assert_eq!(info.vid, None);
        assert_eq!(info.manufacturer, None);
    }

    #[test]
    fn unknown_port_info_serializes() {
        let info = PortInfo::from(SerialPortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            port_type: SerialPortType::Unknown,
        });
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "/dev/ttyACM0");
        assert_eq!(json["kind"], "unknown");
        assert!(json["product"].is_null());
    }

    #[test]
    fn opening_missing_port_fails() {
        let res = SerialChannel::open("/dev/this-port-does-not-exist", 9_600);
        assert!(matches!(res, Err(AppError::Serial(_))));
    }

    #[test]
    fn reader_stops_on_empty_reads_once_receiver_is_gone() {
        let (sink, inbound) = mpsc::channel(1);
        drop(inbound);
        // io::empty() returns Ok(0) forever
        read_port("test".to_string(), io::empty(), sink);
    }

    #[test]
    fn reader_forwards_chunks() {
        let (sink, mut inbound) = mpsc::channel(1);
        let reader = thread::spawn(move || read_port("test".to_string(), &b"\x10R"[..], sink));

        assert_eq!(inbound.blocking_recv(), Some(b"\x10R".to_vec()));
        drop(inbound);
        reader.join().unwrap();
    }
}
