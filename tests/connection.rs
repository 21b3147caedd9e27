//! End-to-end tests driving `Badgelink` over a fake, in-memory transport that
//! plays the badge side of the wire protocol. Exercises the scenarios from
//! the protocol's retry/resync/pagination/bulk-transfer semantics without
//! any real hardware.

use std::collections::VecDeque;

use async_trait::async_trait;
use crc::{Crc, CRC_32_ISO_HDLC};

use badgelink::connection::Connection;
use badgelink::fs::{FsAction, FsDirent, FsResponse};
use badgelink::message::{Packet, Request, Response, ResponseBody, StatusCode, XferCtrl};
use badgelink::transport::Transport;
use badgelink::Badgelink;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn encode_packet_frame(packet: &Packet) -> Vec<u8> {
    let payload = postcard::to_allocvec(packet).expect("packet serializes");
    let crc = CRC32.checksum(&payload).to_le_bytes();
    let mut body = payload;
    body.extend_from_slice(&crc);
    let mut buf = vec![0u8; body.len() + body.len() / 254 + 2];
    let n = cobs::try_encode(&body, &mut buf).expect("buffer sized generously");
    buf.truncate(n);
    buf.push(0x00);
    buf
}

fn decode_wire_to_packet(wire: &[u8]) -> Option<Packet> {
    let mut buf = wire.to_vec();
    let n = cobs::decode_in_place(&mut buf).ok()?;
    buf.truncate(n);
    if buf.len() < 4 {
        return None;
    }
    let split = buf.len() - 4;
    let (payload, crc_bytes) = buf.split_at(split);
    let received = u32::from_le_bytes(crc_bytes.try_into().ok()?);
    if CRC32.checksum(payload) != received {
        return None;
    }
    postcard::from_bytes(payload).ok()
}

fn response(serial: u32, status: StatusCode, body: ResponseBody) -> Packet {
    Packet {
        serial,
        sync: false,
        request: None,
        response: Some(Response { status, body }),
    }
}

/// A fake transport playing the badge side: synchronously decodes every
/// frame the host writes and feeds it to `handler`, queuing up whatever
/// response packets it returns for the host's next `read_all`.
struct FakeBadge<F: FnMut(Packet) -> Vec<Packet> + Send> {
    pending_in: Vec<u8>,
    pending_out: VecDeque<u8>,
    handler: F,
}

impl<F: FnMut(Packet) -> Vec<Packet> + Send> FakeBadge<F> {
    fn new(handler: F) -> Self {
        FakeBadge {
            pending_in: Vec::new(),
            pending_out: VecDeque::new(),
            handler,
        }
    }
}

#[async_trait]
impl<F: FnMut(Packet) -> Vec<Packet> + Send> Transport for FakeBadge<F> {
    async fn write(&mut self, data: &[u8]) -> badgelink::Result<()> {
        self.pending_in.extend_from_slice(data);
        while let Some(pos) = self.pending_in.iter().position(|&b| b == 0x00) {
            let frame: Vec<u8> = self.pending_in.drain(..=pos).collect();
            let wire = &frame[..frame.len() - 1];
            if wire.is_empty() {
                continue;
            }
            if let Some(packet) = decode_wire_to_packet(wire) {
                let replies = if packet.sync {
                    vec![Packet::sync(packet.serial)]
                } else {
                    (self.handler)(packet)
                };
                for reply in replies {
                    self.pending_out.extend(encode_packet_frame(&reply));
                }
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> badgelink::Result<()> {
        Ok(())
    }

    async fn read_all(&mut self) -> badgelink::Result<Vec<u8>> {
        Ok(self.pending_out.drain(..).collect())
    }
}

async fn open_badge<F: FnMut(Packet) -> Vec<Packet> + Send + 'static>(
    handler: F,
) -> Badgelink<FakeBadge<F>> {
    let transport = FakeBadge::new(handler);
    let conn = Connection::open(transport).await.expect("sync succeeds");
    Badgelink::new(conn)
}

#[tokio::test]
async fn sync_handshake_succeeds() {
    let badge = open_badge(|_| vec![]).await;
    drop(badge);
}

#[tokio::test]
async fn stale_serial_response_is_rejected_as_communication_error() {
    let mut badge = open_badge(|packet| {
        let stale = response(
            packet.serial.wrapping_sub(1),
            StatusCode::Ok,
            ResponseBody::Fs(FsResponse::Stat(badgelink::fs::FsStat {
                is_dir: false,
                size: 0,
                ctime: 0,
                mtime: 0,
                atime: 0,
            })),
        );
        let real = response(
            packet.serial,
            StatusCode::Ok,
            ResponseBody::Fs(FsResponse::Stat(badgelink::fs::FsStat {
                is_dir: true,
                size: 42,
                ctime: 1,
                mtime: 2,
                atime: 3,
            })),
        );
        vec![stale, real]
    })
    .await;

    let err = badge.fs_stat("/boot").await.expect_err("serial mismatch is fatal");
    match err {
        badgelink::Error::Communication(msg) => assert_eq!(msg, "Serial mismatch"),
        other => panic!("expected Communication(\"Serial mismatch\"), got {other:?}"),
    }
}

#[tokio::test]
async fn unsolicited_sync_packet_triggers_resync_and_retry() {
    let mut rebooted_once = false;
    let mut badge = open_badge(move |packet| {
        if let Request::Fs(FsAction::Delete { .. }) = packet.request.as_ref().unwrap() {
            if !rebooted_once {
                rebooted_once = true;
                // Simulate the badge rebooting mid-request: it forgets the
                // request and emits an unsolicited sync packet instead.
                return vec![Packet::sync(0xDEAD_BEEF)];
            }
        }
        vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)]
    })
    .await;

    badge.fs_delete("/tmp/x").await.expect("delete succeeds after resync");
}

#[tokio::test]
async fn timeout_is_surfaced_after_retries_exhausted() {
    let mut badge = open_badge(|_| vec![]).await;
    let err = badge.fs_usage().await.expect_err("no response ever arrives");
    assert!(matches!(err, badgelink::Error::Timeout));
}

#[tokio::test]
async fn paginated_list_traverses_every_page() {
    // Scenario: total = 5 entries, page size = 2.
    let names: Vec<String> = (0..5).map(|i| format!("file{i}")).collect();
    let mut badge = open_badge(move |packet| {
        if let Request::Fs(FsAction::List { list_offset, .. }) = packet.request.as_ref().unwrap() {
            let offset = *list_offset as usize;
            let page: Vec<FsDirent> = names
                .iter()
                .skip(offset)
                .take(2)
                .map(|name| FsDirent {
                    name: name.clone(),
                    is_dir: false,
                })
                .collect();
            return vec![response(
                packet.serial,
                StatusCode::Ok,
                ResponseBody::Fs(FsResponse::List {
                    entries: page,
                    total: 5,
                }),
            )];
        }
        vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)]
    })
    .await;

    let entries = badge.fs_list("/").await.expect("list succeeds");
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].name, "file0");
    assert_eq!(entries[4].name, "file4");
}

#[tokio::test]
async fn upload_aborts_without_finish_on_no_space() {
    let mut chunk_count = 0u32;
    let mut badge = open_badge(move |packet| {
        match packet.request.as_ref().unwrap() {
            Request::Fs(FsAction::Upload { .. }) => {
                vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)]
            }
            Request::UploadChunk(_) => {
                chunk_count += 1;
                if chunk_count == 2 {
                    vec![response(packet.serial, StatusCode::NoSpace, ResponseBody::Void)]
                } else {
                    vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)]
                }
            }
            // A correct client never sends Finish after an aborted chunk;
            // answering Ok here would mask that bug if it ever regressed.
            Request::XferCtrl(XferCtrl::Finish) => {
                panic!("client sent Finish after a chunk failed")
            }
            Request::XferCtrl(XferCtrl::Abort) => {
                vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)]
            }
            _ => vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)],
        }
    })
    .await;

    let tmp = std::env::temp_dir().join("badgelink_test_upload.bin");
    std::fs::write(&tmp, vec![0xAAu8; badgelink::message::CHUNK_MAX_SIZE * 3]).unwrap();

    let mut progress = badgelink::NoProgress;
    let err = badge
        .fs_upload("/dest.bin", &tmp, &mut progress)
        .await
        .expect_err("upload fails when the device runs out of space");
    assert!(matches!(err, badgelink::Error::Device { code: StatusCode::NoSpace, .. }));

    std::fs::remove_file(&tmp).ok();
}

#[tokio::test]
async fn download_position_mismatch_is_malformed_response() {
    let mut sent_first = false;
    let mut badge = open_badge(move |packet| match packet.request.as_ref().unwrap() {
        Request::Fs(FsAction::Download { .. }) => vec![response(
            packet.serial,
            StatusCode::Ok,
            ResponseBody::Fs(FsResponse::DownloadStart { size: 8192 }),
        )],
        Request::XferCtrl(XferCtrl::Continue) => {
            let position = if !sent_first {
                sent_first = true;
                0
            } else {
                // Wrong: should be 4096, the size of the first chunk.
                9999
            };
            vec![response(
                packet.serial,
                StatusCode::Ok,
                ResponseBody::DownloadChunk(badgelink::message::Chunk {
                    position,
                    data: vec![0x42; 4096],
                }),
            )]
        }
        _ => vec![response(packet.serial, StatusCode::Ok, ResponseBody::Void)],
    })
    .await;

    let mut progress = badgelink::NoProgress;
    let err = badge
        .fs_download("/src.bin", &mut progress)
        .await
        .expect_err("position mismatch is rejected");
    assert!(matches!(err, badgelink::Error::MalformedResponse(_)));
}
