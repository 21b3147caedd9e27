//! Host-side client library for the Badgelink badge management protocol.
//!
//! A [`Connection`] speaks the wire protocol (framing, serial-number
//! correlation, sync/resync) over any [`Transport`]; [`Badgelink`] wraps a
//! connection with the NVS/AppFS/FS/app-launch operations badges expose.
//!
//! ```no_run
//! # async fn example() -> badgelink::Result<()> {
//! use badgelink::{Badgelink, Connection, UsbTransport};
//!
//! let transport = UsbTransport::open()?;
//! let conn = Connection::open(transport).await?;
//! let mut badge = Badgelink::new(conn);
//! let apps = badge.appfs_list().await?;
//! # Ok(())
//! # }
//! ```

pub mod appfs;
pub mod client;
pub mod connection;
pub mod error;
mod frame;
pub mod fs;
pub mod message;
pub mod nvs;
pub mod progress;
pub mod transport;

pub use client::Badgelink;
pub use connection::Connection;
pub use error::{Error, Result};
pub use progress::{NoProgress, Progress};
pub use transport::{PipeTransport, SerialTransport, UsbTransport};
