//! The protocol engine: framing, serial-number correlation, sync/resync, and
//! retry policy sit here. [`crate::client::Badgelink`] is a thin, domain-aware
//! layer on top that only ever calls [`Connection::request`] and friends.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::frame::{encode_frame, FrameError, FrameReceiver};
use crate::message::{decode_packet, encode_packet, Packet, Request, Response, StatusCode};
use crate::transport::Transport;

/// Default timeout for a single request/response round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);
/// Timeout for a single chunk during a bulk transfer's data phase.
pub const CHUNK_TIMEOUT: Duration = Duration::from_millis(500);
/// Timeout for a whole-transfer preflight (CRC32/size query, initiate, finalize).
pub const XFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed reply window for the sync handshake. Unlike the per-request
/// timeouts, this isn't user-configurable.
const SYNC_TIMEOUT: Duration = Duration::from_millis(500);

const SYNC_ATTEMPTS: u32 = 3;
const REQUEST_ATTEMPTS: u32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A live connection to a badge over some [`Transport`].
///
/// Owns serial-number bookkeeping and frame (de)serialisation; nothing here
/// knows about NVS, AppFS, or FS semantics.
pub struct Connection<T: Transport> {
    transport: T,
    receiver: FrameReceiver,
    serial: u32,
    dump_raw: bool,
    def_timeout: Duration,
    chunk_timeout: Duration,
    xfer_timeout: Duration,
}

impl<T: Transport> Connection<T> {
    /// Open a connection using the default timeout budget.
    pub async fn open(transport: T) -> Result<Self> {
        Self::open_with_timeouts(transport, DEFAULT_TIMEOUT, CHUNK_TIMEOUT, XFER_TIMEOUT).await
    }

    /// Open a connection with an explicit timeout budget, as exposed by the
    /// CLI's `--timeout`/`--chunk-timeout`/`--xfer-timeout` flags.
    pub async fn open_with_timeouts(
        mut transport: T,
        def_timeout: Duration,
        chunk_timeout: Duration,
        xfer_timeout: Duration,
    ) -> Result<Self> {
        // A lone delimiter flushes out any partial frame the badge may have
        // been mid-way through sending to a previous, now-gone, host.
        transport.write(&[0x00]).await?;
        transport.flush().await?;
        let _ = transport.read_all().await?;

        let mut conn = Connection {
            transport,
            receiver: FrameReceiver::new(),
            serial: rand::thread_rng().gen(),
            dump_raw: false,
            def_timeout,
            chunk_timeout,
            xfer_timeout,
        };
        conn.sync().await?;
        Ok(conn)
    }

    /// Enable or disable logging of raw wire frames, for `--dump-raw-bytes`.
    pub fn set_dump_raw(&mut self, dump_raw: bool) {
        self.dump_raw = dump_raw;
    }

    /// Perform the sync handshake: send a sync packet with a freshly
    /// randomised serial and wait for the badge to echo it back within a
    /// fixed 500 ms window. Retried up to [`SYNC_ATTEMPTS`] times,
    /// re-randomising the serial each attempt, so a stale in-flight response
    /// from a previous session can't be mistaken for this one's. Any reply
    /// that isn't the expected sync echo is treated as a protocol violation,
    /// not a retry signal.
    async fn sync(&mut self) -> Result<()> {
        let mut last_err = Error::Timeout;
        for _ in 0..SYNC_ATTEMPTS {
            self.serial = rand::thread_rng().gen();
            let expected = self.serial;
            self.send_packet(&Packet::sync(expected)).await?;

            let deadline = Instant::now() + SYNC_TIMEOUT;
            match self.recv_packet(deadline).await {
                Ok(pkt) if pkt.sync && pkt.serial == expected => return Ok(()),
                Ok(_) => return Err(Error::Communication("Invalid sync".into())),
                Err(Error::Timeout) => {
                    last_err = Error::Timeout;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Send `request` and wait for its matching response, using the default
    /// per-request timeout.
    pub(crate) async fn request(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, self.def_timeout).await
    }

    /// As [`Connection::request`], but for a single bulk-transfer chunk.
    pub(crate) async fn request_chunk(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, self.chunk_timeout).await
    }

    /// As [`Connection::request`], but for a whole-transfer operation
    /// (preflight query, initiate, finalize).
    pub(crate) async fn request_xfer(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, self.xfer_timeout).await
    }

    /// Core request/response cycle. Pre-increments the serial,
    /// sends the request, and waits for its echo. An unsolicited sync packet
    /// is taken as evidence the badge rebooted mid-session: resync and retry
    /// the same request. The host never buffers out-of-order responses: a
    /// response carrying any serial other than the one just sent is a
    /// protocol violation and fails the request outright.
    async fn request_with_timeout(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        let mut last_err = Error::Timeout;
        'attempt: for _ in 0..REQUEST_ATTEMPTS {
            self.serial = self.serial.wrapping_add(1);
            let expected = self.serial;
            self.send_packet(&Packet::request(expected, request.clone()))
                .await?;

            let deadline = Instant::now() + timeout;
            match self.recv_packet(deadline).await {
                Ok(pkt) if pkt.sync => {
                    log::warn!("unsolicited sync packet from badge, resyncing");
                    self.sync().await?;
                    continue 'attempt;
                }
                Ok(pkt) if pkt.serial != expected => {
                    return Err(Error::Communication("Serial mismatch".into()));
                }
                Ok(pkt) => {
                    let response = pkt.response.ok_or_else(|| {
                        Error::MalformedResponse("response packet carried no response body".into())
                    })?;
                    return status_to_result(response);
                }
                Err(Error::Timeout) => {
                    last_err = Error::Timeout;
                    continue 'attempt;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let payload = encode_packet(packet)
            .map_err(|e| Error::Communication(format!("failed to encode packet: {e}")))?;
        let frame = encode_frame(&payload);
        if self.dump_raw {
            log::debug!("-> {}", hex_dump(&frame));
        }
        self.transport.write(&frame).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Block (cooperatively) until a complete, well-formed packet has been
    /// received, or `deadline` passes.
    async fn recv_packet(&mut self, deadline: Instant) -> Result<Packet> {
        loop {
            if let Some(frame) = self.receiver.try_take_frame() {
                let payload = frame.map_err(frame_error_to_communication)?;
                if self.dump_raw {
                    log::debug!("<- {}", hex_dump(&payload));
                }
                return decode_packet(&payload)
                    .map_err(|e| Error::Communication(format!("failed to decode packet: {e}")));
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }

            let bytes = self.transport.read_all().await?;
            if bytes.is_empty() {
                tokio::time::sleep(POLL_INTERVAL).await;
            } else {
                self.receiver.feed(&bytes);
            }
        }
    }
}

fn frame_error_to_communication(err: FrameError) -> Error {
    Error::Communication(err.to_string())
}

fn status_to_result(response: Response) -> Result<Response> {
    if response.status == StatusCode::Ok {
        Ok(response)
    } else {
        Err(Error::device(response.status, None))
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}
