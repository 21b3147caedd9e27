//! The Packet envelope and its Request/Response payloads.
//!
//! Serialises and parses the tagged-union wire schema using `postcard` over
//! `serde`-derived types. Both sides must agree on variant order for
//! postcard's positional encoding to line up correctly.

use serde::{Deserialize, Serialize};

use crate::appfs::{AppfsAction, AppfsResponse};
use crate::fs::{FsAction, FsResponse};
use crate::nvs::{NvsAction, NvsResponse};

/// Maximum size, in bytes, of a single bulk-transfer chunk's data.
pub const CHUNK_MAX_SIZE: usize = 4096;

/// Device-reported status of a request, mapped one-to-one to an [`crate::Error`]
/// by the connection layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    InternalError,
    Malformed,
    NotSupported,
    NotFound,
    IllegalState,
    NoSpace,
    NotEmpty,
    IsFile,
    IsDir,
    Exists,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusCode::Ok => "ok",
            StatusCode::InternalError => "badge internal error",
            StatusCode::Malformed => "malformed request",
            StatusCode::NotSupported => "request not supported",
            StatusCode::NotFound => "not found",
            StatusCode::IllegalState => "illegal state",
            StatusCode::NoSpace => "out of flash space",
            StatusCode::NotEmpty => "directory not empty",
            StatusCode::IsFile => "is a file",
            StatusCode::IsDir => "is a directory",
            StatusCode::Exists => "already exists",
        };
        f.write_str(s)
    }
}

/// A contiguous segment of a bulk transfer. `position` is the absolute byte
/// offset of `data` within the file being transferred.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub position: u64,
    pub data: Vec<u8>,
}

/// Transfer control values sent during the data phase of a bulk transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum XferCtrl {
    Continue,
    Finish,
    Abort,
}

/// Host → device request bodies. A tagged union over domains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    StartApp { slug: String, arg: String },
    Nvs(NvsAction),
    Appfs(AppfsAction),
    Fs(FsAction),
    UploadChunk(Chunk),
    XferCtrl(XferCtrl),
}

/// Device → host response bodies, domain-specific payload carried alongside
/// a [`StatusCode`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ResponseBody {
    Void,
    Nvs(NvsResponse),
    Appfs(AppfsResponse),
    Fs(FsResponse),
    DownloadChunk(Chunk),
}

/// A device → host response: a status code plus its domain-specific body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    pub body: ResponseBody,
}

/// The envelope carried by every frame's payload. Exactly one of
/// `{sync, request, response}` is meaningful per packet; chunk data and
/// transfer control are sub-cases carried inside `request`
/// (`Request::UploadChunk`/`Request::XferCtrl`) and `response`
/// (`ResponseBody::DownloadChunk`), not independent fields — see DESIGN.md
/// for the rationale.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Packet {
    pub serial: u32,
    pub sync: bool,
    pub request: Option<Request>,
    pub response: Option<Response>,
}

impl Packet {
    pub fn sync(serial: u32) -> Self {
        Packet {
            serial,
            sync: true,
            request: None,
            response: None,
        }
    }

    pub fn request(serial: u32, request: Request) -> Self {
        Packet {
            serial,
            sync: false,
            request: Some(request),
            response: None,
        }
    }
}

/// Serialise a packet to its postcard-encoded frame payload.
pub(crate) fn encode_packet(packet: &Packet) -> postcard::Result<Vec<u8>> {
    postcard::to_allocvec(packet)
}

/// Parse a frame payload into a packet.
pub(crate) fn decode_packet(bytes: &[u8]) -> postcard::Result<Packet> {
    postcard::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsAction, FsResponse, FsStat};

    #[test]
    fn sync_packet_round_trips() {
        let packet = Packet::sync(0x1234_5678);
        let bytes = encode_packet(&packet).unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded.serial, packet.serial);
        assert!(decoded.sync);
        assert!(decoded.request.is_none());
    }

    #[test]
    fn request_packet_round_trips() {
        let packet = Packet::request(
            7,
            Request::Fs(FsAction::Stat {
                path: "/apps".to_string(),
            }),
        );
        let bytes = encode_packet(&packet).unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded.serial, 7);
        assert!(!decoded.sync);
        match decoded.request {
            Some(Request::Fs(FsAction::Stat { path })) => assert_eq!(path, "/apps"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn response_packet_round_trips() {
        let stat = FsStat {
            is_dir: true,
            size: 128,
            ctime: 1,
            mtime: 2,
            atime: 3,
        };
        let packet = Packet {
            serial: 42,
            sync: false,
            request: None,
            response: Some(Response {
                status: StatusCode::Ok,
                body: ResponseBody::Fs(FsResponse::Stat(stat)),
            }),
        };
        let bytes = encode_packet(&packet).unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        match decoded.response {
            Some(Response {
                status: StatusCode::Ok,
                body: ResponseBody::Fs(FsResponse::Stat(s)),
            }) => assert_eq!(s.size, 128),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn status_code_display_is_human_readable() {
        assert_eq!(StatusCode::NoSpace.to_string(), "out of flash space");
    }
}
