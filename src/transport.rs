//! Byte-stream transports: USB bulk endpoints, a serial UART, or a pair of
//! host pipes.
//!
//! A transport is a capability of exactly three operations; no inheritance or
//! shared base type is needed.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// VID/PID of the Tanmatsu / MCH2022 badge's WebUSB interface. Other badge
/// hardware speaking the same protocol can override these via
/// [`UsbTransport::open_with_ids`].
pub const DEFAULT_VENDOR_ID: u16 = 0x16d0;
pub const DEFAULT_PRODUCT_ID: u16 = 0x0f9a;

/// USB vendor-class interface code the badge's management interface is
/// expected to advertise.
const USB_CLASS_VENDOR: u8 = 0xff;

/// Chunk size for looped bulk OUT writes; kept conservative so it works
/// across USB full-speed and high-speed endpoints alike.
const USB_WRITE_CHUNK: usize = 64;
/// Read buffer size for bulk IN polls.
const USB_READ_CHUNK: usize = 512;

/// Cooperative yield between partial USB writes; not a correctness
/// requirement, just backpressure so a slow device isn't flooded.
const USB_WRITE_PAUSE: std::time::Duration = std::time::Duration::from_millis(10);

/// The byte-stream abstraction a [`crate::Connection`] drives. Implementors
/// need not buffer internally beyond what's necessary to satisfy `read_all`;
/// framing and resynchronisation are entirely the connection layer's job.
#[async_trait]
pub trait Transport: Send {
    /// Write bytes to the device, looping over partial writes as needed.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any buffered output.
    async fn flush(&mut self) -> Result<()>;

    /// Return whatever bytes are currently available without blocking.
    /// An empty result means "nothing available right now", not EOF.
    async fn read_all(&mut self) -> Result<Vec<u8>>;
}

fn map_io_err(_err: io::Error) -> Error {
    Error::Disconnected
}

// ---- USB bulk transport --------------------------------------------------

pub struct UsbTransport {
    iface: nusb::Interface,
    ep_out: u8,
    ep_in: u8,
}

impl UsbTransport {
    /// Open the default badge (Tanmatsu / MCH2022 VID:PID).
    pub fn open() -> Result<Self> {
        Self::open_with_ids(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID)
    }

    /// Open a badge identified by an explicit VID/PID pair.
    pub fn open_with_ids(vendor_id: u16, product_id: u16) -> Result<Self> {
        let device_info = nusb::list_devices()
            .map_err(|_| Error::Disconnected)?
            .find(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .ok_or(Error::Disconnected)?;

        let device = device_info.open().map_err(|_| Error::Disconnected)?;
        let config = device.active_configuration().map_err(|_| Error::Disconnected)?;

        let iface_num = config
            .interfaces()
            .find(|i| i.alt_settings().any(|a| a.class() == USB_CLASS_VENDOR))
            .ok_or(Error::Disconnected)?
            .interface_number();

        let iface = device
            .claim_interface(iface_num)
            .map_err(|_| Error::Disconnected)?;

        let alt = iface.descriptors().next().ok_or(Error::Disconnected)?;
        let ep_out = alt
            .endpoints()
            .find(|e| e.direction() == nusb::transfer::Direction::Out)
            .ok_or(Error::Disconnected)?
            .address();
        let ep_in = alt
            .endpoints()
            .find(|e| e.direction() == nusb::transfer::Direction::In)
            .ok_or(Error::Disconnected)?
            .address();

        log::info!("opened USB badge {vendor_id:#06x}:{product_id:#06x}");
        Ok(UsbTransport {
            iface,
            ep_out,
            ep_in,
        })
    }
}

#[async_trait]
impl Transport for UsbTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(USB_WRITE_CHUNK) {
            self.iface
                .bulk_out(self.ep_out, chunk.to_vec())
                .await
                .into_result()
                .map_err(|_| Error::Disconnected)?;
            tokio::time::sleep(USB_WRITE_PAUSE).await;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn read_all(&mut self) -> Result<Vec<u8>> {
        let data = self
            .iface
            .bulk_in(self.ep_in, nusb::transfer::RequestBuffer::new(USB_READ_CHUNK))
            .await
            .into_result()
            .map_err(|_| Error::Disconnected)?;
        Ok(data)
    }
}

// ---- Serial UART transport ------------------------------------------------

/// Default baud rate for opening a serial port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Bound on a single serial read poll. A `SerialStream` has no `WouldBlock`
/// signal of its own — an unbounded read suspends until a byte arrives, which
/// would stop [`crate::Connection`] from ever re-checking its deadline. This
/// caps how long `read_all` can suspend before handing control back.
const SERIAL_POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(20);

pub struct SerialTransport {
    port: tokio_serial::SerialStream,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_baud(path, DEFAULT_BAUD_RATE)
    }

    pub fn open_with_baud(path: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .open_native_async()
            .map_err(|_| Error::Disconnected)?;
        log::info!("opened serial badge on {path} at {baud_rate} baud");
        Ok(SerialTransport { port })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data).await.map_err(map_io_err)
    }

    async fn flush(&mut self) -> Result<()> {
        self.port.flush().await.map_err(map_io_err)
    }

    async fn read_all(&mut self) -> Result<Vec<u8>> {
        match tokio::time::timeout(SERIAL_POLL_TIMEOUT, read_nonblocking(&mut self.port)).await {
            Ok(result) => result,
            Err(_) => Ok(Vec::new()),
        }
    }
}

// ---- Dual-pipe transport ---------------------------------------------------

/// A dedicated input-pipe + output-pipe pair, as used when the badge is
/// reachable only through a pair of named pipes/FIFOs rather than a real bus.
pub struct PipeTransport {
    infd: tokio::fs::File,
    outfd: tokio::fs::File,
}

impl PipeTransport {
    pub async fn open(in_path: impl AsRef<Path>, out_path: impl AsRef<Path>) -> Result<Self> {
        let infd = open_nonblocking_read(in_path.as_ref())
            .await
            .map_err(map_io_err)?;
        let outfd = tokio::fs::OpenOptions::new()
            .write(true)
            .open(out_path.as_ref())
            .await
            .map_err(map_io_err)?;
        Ok(PipeTransport { infd, outfd })
    }
}

#[cfg(unix)]
async fn open_nonblocking_read(path: &Path) -> io::Result<tokio::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    let std_file = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;
    Ok(tokio::fs::File::from_std(std_file))
}

#[cfg(not(unix))]
async fn open_nonblocking_read(path: &Path) -> io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new().read(true).open(path).await
}

#[async_trait]
impl Transport for PipeTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.outfd.write_all(data).await.map_err(map_io_err)
    }

    async fn flush(&mut self) -> Result<()> {
        self.outfd.flush().await.map_err(map_io_err)
    }

    async fn read_all(&mut self) -> Result<Vec<u8>> {
        read_nonblocking(&mut self.infd).await
    }
}

/// Drain whatever is immediately available from an async reader, treating
/// `WouldBlock` as "nothing available" rather than an error.
async fn read_nonblocking<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; USB_READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(map_io_err(e)),
        }
        if out.len() < USB_READ_CHUNK {
            // Short read: the source is very likely drained for now.
            break;
        }
    }
    Ok(out)
}
