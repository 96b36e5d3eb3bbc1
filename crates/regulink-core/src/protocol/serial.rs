//! Serial port handling
//!
//! Port discovery and the [`Transport`] implementation over a real serial line.

use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use super::{Transport, TransportError};
use crate::settings::{ComPortSettings, Parity, StopBits};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

/// RS-485 adapters show up as ttyUSB*, so those sort first, then ttyS*,
/// then everything else by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyS") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("COM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        manufacturer: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(stop_bits: StopBits) -> tokio_serial::StopBits {
    match stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

/// Serial line to the regulator
#[derive(Default)]
pub struct SerialTransport {
    port: Option<SerialStream>,
    write_timeout: Duration,
}

impl SerialTransport {
    /// Closed transport; [`Transport::open`] picks the port
    pub fn new() -> Self {
        Self::default()
    }

    fn port(&mut self) -> Result<&mut SerialStream, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, settings: &ComPortSettings) -> Result<(), TransportError> {
        self.port = None;
        let port = tokio_serial::new(&settings.port_name, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .parity(parity(settings.parity))
            .stop_bits(stop_bits(settings.stop_bits))
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(settings.read_timeout())
            .open_native_async()
            .map_err(|e| TransportError::PortUnavailable(format!("{}: {}", settings.port_name, e)))?;

        info!(
            port = %settings.port_name,
            baud = settings.baud_rate,
            "serial port opened"
        );
        self.write_timeout = settings.write_timeout();
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            info!("serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn discard_buffers(&mut self) -> Result<(), TransportError> {
        self.port()?
            .clear(tokio_serial::ClearBuffer::All)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let write_timeout = self.write_timeout;
        let port = self.port()?;
        debug!("TX {} bytes: {:02x?}", bytes.len(), bytes);
        match timeout(write_timeout, async {
            port.write_all(bytes).await?;
            port.flush().await
        })
        .await
        {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => {
                warn!("write timed out after {}ms", write_timeout.as_millis());
                Err(TransportError::Timeout {
                    expected: bytes.len(),
                })
            }
        }
    }

    async fn read_exact(&mut self, n: usize, limit: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        let deadline = Instant::now() + limit;
        let mut buf = vec![0u8; n];
        let mut offset = 0;

        while offset < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, port.read(&mut buf[offset..])).await {
                Ok(Ok(0)) => return Err(TransportError::Io("serial port reached EOF".into())),
                Ok(Ok(read)) => {
                    debug!("RX {} bytes: {:02x?}", read, &buf[offset..offset + read]);
                    offset += read;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Ok(Err(e)) => return Err(TransportError::from(e)),
                Err(_) => break,
            }
            if Instant::now() >= deadline && offset < n {
                break;
            }
        }

        match offset {
            _ if offset == n => Ok(buf),
            0 => Err(TransportError::Timeout { expected: n }),
            _ => {
                buf.truncate(offset);
                Err(TransportError::ShortRead {
                    expected: n,
                    received: buf,
                })
            }
        }
    }
}
