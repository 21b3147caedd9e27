//! COBS + CRC32 frame codec.
//!
//! On the wire: `COBS(payload ‖ crc32_le(payload)) ‖ 0x00`. COBS guarantees the
//! encoded body is free of `0x00`, so the trailing zero is an unambiguous frame
//! delimiter; `crc32_le` is the standard IEEE-802.3 CRC32, emitted little-endian.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Delimiter terminating every frame on the wire.
pub(crate) const FRAME_DELIMITER: u8 = 0x00;

/// Minimum legal size, in bytes, of a frame's on-wire body before the delimiter.
const MIN_WIRE_LEN: usize = 7;

/// A decode error, kept distinct so callers can log which check failed before it
/// is folded into `Error::Communication` at the connection layer.
#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameError {
    #[error("frame too short ({0} bytes on the wire)")]
    TooShort(usize),
    #[error("COBS decode failed")]
    CobsDecode,
    #[error("CRC32 mismatch: received {received:#010x}, calculated {calculated:#010x}")]
    CrcMismatch { received: u32, calculated: u32 },
}

/// Encode a payload into a complete on-wire frame, including the trailing
/// delimiter.
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let crc = CRC32.checksum(payload).to_le_bytes();
    let mut body = Vec::with_capacity(payload.len() + crc.len());
    body.extend_from_slice(payload);
    body.extend_from_slice(&crc);

    let mut cobs_buf = vec![0u8; body.len() + body.len() / 254 + 2];
    let cobs_len =
        cobs::try_encode(&body, &mut cobs_buf).expect("COBS encode buffer sized generously");

    let mut frame = Vec::with_capacity(cobs_len + 1);
    frame.extend_from_slice(&cobs_buf[..cobs_len]);
    frame.push(FRAME_DELIMITER);
    frame
}

/// Decode a single frame's body (the bytes preceding the delimiter, delimiter
/// already stripped by the caller) into its payload.
pub(crate) fn decode_frame(wire: &[u8]) -> Result<Vec<u8>, FrameError> {
    if wire.len() < MIN_WIRE_LEN {
        return Err(FrameError::TooShort(wire.len()));
    }

    let mut buf = wire.to_vec();
    let decoded_len = cobs::decode_in_place(&mut buf).map_err(|_| FrameError::CobsDecode)?;
    buf.truncate(decoded_len);

    if buf.len() < 4 {
        return Err(FrameError::TooShort(wire.len()));
    }

    let split = buf.len() - 4;
    let (payload, crc_bytes) = buf.split_at(split);
    let received = u32::from_le_bytes(crc_bytes.try_into().expect("4-byte slice"));
    let calculated = CRC32.checksum(payload);
    if received != calculated {
        return Err(FrameError::CrcMismatch {
            received,
            calculated,
        });
    }

    Ok(payload.to_vec())
}

/// A streaming frame receiver: accumulates bytes from the transport and yields
/// complete frame payloads as soon as a delimiter is seen, discarding the
/// consumed bytes (including the delimiter) so the buffer never grows
/// unbounded across successful receives.
#[derive(Default)]
pub(crate) struct FrameReceiver {
    buf: Vec<u8>,
}

impl FrameReceiver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read bytes to the receive buffer.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// If a complete frame is present, decode and return its payload, removing
    /// the consumed bytes (leading zero-delimiters are skipped as benign).
    pub(crate) fn try_take_frame(&mut self) -> Option<Result<Vec<u8>, FrameError>> {
        let zero = self.buf.iter().position(|&b| b == FRAME_DELIMITER)?;
        let wire: Vec<u8> = self.buf.drain(..=zero).collect();
        let wire = &wire[..wire.len() - 1];
        if wire.is_empty() {
            // Consecutive delimiters: benign, try again on the next call.
            return self.try_take_frame();
        }
        Some(decode_frame(wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_scenario_payload() {
        let payload = [0x11, 0x22, 0x33];
        let frame = encode_frame(&payload);
        assert_eq!(*frame.last().unwrap(), FRAME_DELIMITER);

        let mut recv = FrameReceiver::new();
        recv.feed(&frame);
        let decoded = recv.try_take_frame().unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn crc_is_ieee_802_3() {
        // crc32("\x11\x22\x33") = 0xCBF43926, the standard IEEE-802.3 test vector.
        assert_eq!(CRC32.checksum(&[0x11, 0x22, 0x33]), 0xCBF43926);
    }

    #[test]
    fn empty_payload_round_trips() {
        let frame = encode_frame(&[]);
        let mut recv = FrameReceiver::new();
        recv.feed(&frame);
        let decoded = recv.try_take_frame().unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn crc_mismatch_is_detected() {
        let mut frame = encode_frame(b"hello");
        // Flip a bit inside the COBS-encoded body, before the delimiter.
        let len = frame.len();
        frame[len - 2] ^= 0x01;
        let mut recv = FrameReceiver::new();
        recv.feed(&frame);
        match recv.try_take_frame().unwrap() {
            Err(FrameError::CrcMismatch { .. }) | Err(FrameError::CobsDecode) => {}
            other => panic!("expected CrcMismatch or CobsDecode, got {other:?}"),
        }
    }

    #[test]
    fn short_wire_frame_is_rejected() {
        let mut recv = FrameReceiver::new();
        recv.feed(&[1, 2, 3, 0]);
        match recv.try_take_frame().unwrap() {
            Err(FrameError::TooShort(_)) => {}
            other => panic!("expected TooShort, got {other:?}"),
        }
    }

    #[test]
    fn buffer_does_not_retain_consumed_bytes() {
        let frame = encode_frame(b"x");
        let mut recv = FrameReceiver::new();
        recv.feed(&frame);
        recv.try_take_frame().unwrap().unwrap();
        assert!(recv.buf.is_empty());
    }

    #[test]
    fn leading_delimiters_are_skipped() {
        let frame = encode_frame(b"payload");
        let mut recv = FrameReceiver::new();
        recv.feed(&[0x00, 0x00, 0x00]);
        recv.feed(&frame);
        let decoded = recv.try_take_frame().unwrap().unwrap();
        assert_eq!(decoded, b"payload");
    }

    proptest::proptest! {
        #[test]
        fn round_trip_any_payload(payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512)) {
            let frame = encode_frame(&payload);
            let mut recv = FrameReceiver::new();
            recv.feed(&frame);
            let decoded = recv.try_take_frame().unwrap().unwrap();
            proptest::prop_assert_eq!(decoded, payload);
        }

        #[test]
        fn single_byte_flip_is_detected(
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..256),
            flip_index in 0usize..512,
        ) {
            let frame = encode_frame(&payload);
            let body_len = frame.len() - 1; // exclude delimiter
            let idx = flip_index % body_len;
            let mut corrupted = frame.clone();
            corrupted[idx] ^= 0x01;

            let mut recv = FrameReceiver::new();
            recv.feed(&corrupted);
            match recv.try_take_frame() {
                Some(Ok(decoded)) => {
                    // COBS overhead bytes can absorb a flip without changing the
                    // decoded payload; only assert when the corruption surfaced.
                    proptest::prop_assert_eq!(decoded, payload);
                }
                Some(Err(_)) => {}
                None => proptest::prop_assert!(false, "expected a frame to be present"),
            }
        }
    }
}
