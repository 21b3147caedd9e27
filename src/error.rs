//! Error kinds raised by the Badgelink core.
//!
//! The ten device status codes collapse into a single `Device` variant
//! carrying the status code plus an optional human-readable descriptor.

use crate::message::StatusCode;

/// Errors produced by the Badgelink protocol engine and client facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame too short, COBS decode failure, CRC mismatch, or serial/sync mismatch.
    #[error("communication error: {0}")]
    Communication(String),

    /// No response arrived within the operation's budget after retries.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The transport reported an I/O failure; the connection is no longer usable.
    #[error("badge disconnected")]
    Disconnected,

    /// A well-framed packet whose contents are semantically invalid.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The badge reported a non-`Ok` status code for the request.
    #[error("{}", device_error_message(.code, .context))]
    Device {
        code: StatusCode,
        context: Option<String>,
    },
}

fn device_error_message(code: &StatusCode, context: &Option<String>) -> String {
    match context {
        Some(what) => format!("{code}: {what}"),
        None => code.to_string(),
    }
}

impl Error {
    pub(crate) fn device(code: StatusCode, context: Option<String>) -> Self {
        Error::Device { code, context }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
