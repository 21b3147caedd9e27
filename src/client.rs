//! The `Badgelink` facade: one method per device operation.
//!
//! Every method validates its own arguments before a single byte goes on the
//! wire, then drives [`Connection`] through however many request/response
//! round trips the operation needs. Bulk transfers (`*_upload`/`*_download`)
//! additionally drive the chunked data-phase sub-protocol.

use std::io::Read;
use std::path::Path;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::appfs::{self, AppfsAction, AppfsMetadata, AppfsResponse};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::fs::{self, FsAction, FsDirent, FsResponse, FsStat, FsUsage};
use crate::message::{Chunk, Request, ResponseBody, XferCtrl, CHUNK_MAX_SIZE};
use crate::nvs::{self, NvsAction, NvsEntry, NvsResponse, NvsValue, NvsValueType};
use crate::progress::Progress;
use crate::transport::Transport;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
/// Read granularity when hashing a local file before upload; large enough to
/// keep syscall overhead low without holding the whole file in memory.
const PREFLIGHT_READ_SIZE: usize = 1024 * 1024;

/// A connected badge, offering the full NVS/AppFS/FS/app-launch surface.
pub struct Badgelink<T: Transport> {
    conn: Connection<T>,
}

impl<T: Transport> Badgelink<T> {
    pub fn new(conn: Connection<T>) -> Self {
        Badgelink { conn }
    }

    pub fn into_connection(self) -> Connection<T> {
        self.conn
    }

    // ---- App launch --------------------------------------------------

    pub async fn start_app(&mut self, slug: &str, arg: &str) -> Result<()> {
        appfs::validate_slug(slug).map_err(Error::MalformedResponse)?;
        appfs::validate_arg(arg).map_err(Error::MalformedResponse)?;
        self.conn
            .request(Request::StartApp {
                slug: slug.to_string(),
                arg: arg.to_string(),
            })
            .await?;
        Ok(())
    }

    // ---- NVS -----------------------------------------------------------

    pub async fn nvs_read(
        &mut self,
        namespace: &str,
        key: &str,
        value_type: NvsValueType,
    ) -> Result<NvsValue> {
        nvs::validate_ns_key("namespace", namespace).map_err(Error::MalformedResponse)?;
        nvs::validate_ns_key("key", key).map_err(Error::MalformedResponse)?;

        let response = self
            .conn
            .request(Request::Nvs(NvsAction::Read {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value_type,
            }))
            .await?;
        match response.body {
            ResponseBody::Nvs(NvsResponse::Read(value)) => Ok(value),
            other => Err(unexpected_body("nvs read", other)),
        }
    }

    pub async fn nvs_write(&mut self, namespace: &str, key: &str, value: NvsValue) -> Result<()> {
        nvs::validate_ns_key("namespace", namespace).map_err(Error::MalformedResponse)?;
        nvs::validate_ns_key("key", key).map_err(Error::MalformedResponse)?;
        value.validate().map_err(Error::MalformedResponse)?;

        self.conn
            .request(Request::Nvs(NvsAction::Write {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value,
            }))
            .await?;
        Ok(())
    }

    pub async fn nvs_delete(&mut self, namespace: &str, key: &str) -> Result<()> {
        nvs::validate_ns_key("namespace", namespace).map_err(Error::MalformedResponse)?;
        nvs::validate_ns_key("key", key).map_err(Error::MalformedResponse)?;

        self.conn
            .request(Request::Nvs(NvsAction::Delete {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn nvs_list(&mut self, namespace: Option<&str>) -> Result<Vec<NvsEntry>> {
        if let Some(ns) = namespace {
            nvs::validate_ns_key("namespace", ns).map_err(Error::MalformedResponse)?;
        }

        let mut entries = Vec::new();
        loop {
            let response = self
                .conn
                .request(Request::Nvs(NvsAction::List {
                    namespace: namespace.map(str::to_string),
                    list_offset: entries.len() as u32,
                }))
                .await?;
            let (mut page, total) = match response.body {
                ResponseBody::Nvs(NvsResponse::List { entries, total }) => (entries, total),
                other => return Err(unexpected_body("nvs list", other)),
            };
            if page.is_empty() {
                break;
            }
            entries.append(&mut page);
            if entries.len() as u32 >= total {
                break;
            }
        }
        Ok(entries)
    }

    // ---- AppFS -----------------------------------------------------------

    pub async fn appfs_list(&mut self) -> Result<Vec<AppfsMetadata>> {
        let mut entries = Vec::new();
        loop {
            let response = self
                .conn
                .request(Request::Appfs(AppfsAction::List {
                    list_offset: entries.len() as u32,
                }))
                .await?;
            let (mut page, total) = match response.body {
                ResponseBody::Appfs(AppfsResponse::List { entries, total }) => (entries, total),
                other => return Err(unexpected_body("appfs list", other)),
            };
            if page.is_empty() {
                break;
            }
            entries.append(&mut page);
            if entries.len() as u32 >= total {
                break;
            }
        }
        Ok(entries)
    }

    pub async fn appfs_stat(&mut self, slug: &str) -> Result<AppfsMetadata> {
        appfs::validate_slug(slug).map_err(Error::MalformedResponse)?;
        let response = self
            .conn
            .request(Request::Appfs(AppfsAction::Stat {
                slug: slug.to_string(),
            }))
            .await?;
        match response.body {
            ResponseBody::Appfs(AppfsResponse::Stat(meta)) => Ok(meta),
            other => Err(unexpected_body("appfs stat", other)),
        }
    }

    pub async fn appfs_crc32(&mut self, slug: &str) -> Result<u32> {
        appfs::validate_slug(slug).map_err(Error::MalformedResponse)?;
        let response = self
            .conn
            .request(Request::Appfs(AppfsAction::Crc32 {
                slug: slug.to_string(),
            }))
            .await?;
        match response.body {
            ResponseBody::Appfs(AppfsResponse::Crc32(crc)) => Ok(crc),
            other => Err(unexpected_body("appfs crc32", other)),
        }
    }

    pub async fn appfs_delete(&mut self, slug: &str) -> Result<()> {
        appfs::validate_slug(slug).map_err(Error::MalformedResponse)?;
        self.conn
            .request(Request::Appfs(AppfsAction::Delete {
                slug: slug.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn appfs_usage(&mut self) -> Result<FsUsage> {
        let response = self.conn.request(Request::Appfs(AppfsAction::Usage)).await?;
        match response.body {
            ResponseBody::Appfs(AppfsResponse::Usage(usage)) => Ok(usage),
            other => Err(unexpected_body("appfs usage", other)),
        }
    }

    pub async fn appfs_upload(
        &mut self,
        metadata: AppfsMetadata,
        local_path: &Path,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        appfs::validate_slug(&metadata.slug).map_err(Error::MalformedResponse)?;
        appfs::validate_title(&metadata.title).map_err(Error::MalformedResponse)?;

        let (crc32, size) = preflight_crc32(local_path)?;
        let mut metadata = metadata;
        metadata.size = size;

        self.conn
            .request_xfer(Request::Appfs(AppfsAction::Upload { metadata, crc32 }))
            .await?;

        self.upload_data_phase(local_path, size, progress).await
    }

    pub async fn appfs_download(
        &mut self,
        slug: &str,
        progress: &mut dyn Progress,
    ) -> Result<Vec<u8>> {
        appfs::validate_slug(slug).map_err(Error::MalformedResponse)?;
        let response = self
            .conn
            .request_xfer(Request::Appfs(AppfsAction::Download {
                slug: slug.to_string(),
            }))
            .await?;
        let size = match response.body {
            ResponseBody::Appfs(AppfsResponse::DownloadStart { size }) => size,
            other => return Err(unexpected_body("appfs download", other)),
        };
        self.download_data_phase(size, progress).await
    }

    // ---- FS -----------------------------------------------------------

    pub async fn fs_list(&mut self, path: &str) -> Result<Vec<FsDirent>> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        let mut entries = Vec::new();
        loop {
            let response = self
                .conn
                .request(Request::Fs(FsAction::List {
                    path: path.to_string(),
                    list_offset: entries.len() as u32,
                }))
                .await?;
            let (mut page, total) = match response.body {
                ResponseBody::Fs(FsResponse::List { entries, total }) => (entries, total),
                other => return Err(unexpected_body("fs list", other)),
            };
            if page.is_empty() {
                break;
            }
            entries.append(&mut page);
            if entries.len() as u32 >= total {
                break;
            }
        }
        Ok(entries)
    }

    pub async fn fs_stat(&mut self, path: &str) -> Result<FsStat> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        let response = self
            .conn
            .request(Request::Fs(FsAction::Stat {
                path: path.to_string(),
            }))
            .await?;
        match response.body {
            ResponseBody::Fs(FsResponse::Stat(stat)) => Ok(stat),
            other => Err(unexpected_body("fs stat", other)),
        }
    }

    pub async fn fs_crc32(&mut self, path: &str) -> Result<u32> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        let response = self
            .conn
            .request(Request::Fs(FsAction::Crc32 {
                path: path.to_string(),
            }))
            .await?;
        match response.body {
            ResponseBody::Fs(FsResponse::Crc32(crc)) => Ok(crc),
            other => Err(unexpected_body("fs crc32", other)),
        }
    }

    pub async fn fs_delete(&mut self, path: &str) -> Result<()> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        self.conn
            .request(Request::Fs(FsAction::Delete {
                path: path.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn fs_mkdir(&mut self, path: &str) -> Result<()> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        self.conn
            .request(Request::Fs(FsAction::Mkdir {
                path: path.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn fs_rmdir(&mut self, path: &str) -> Result<()> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        self.conn
            .request(Request::Fs(FsAction::Rmdir {
                path: path.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn fs_usage(&mut self) -> Result<FsUsage> {
        let response = self.conn.request(Request::Fs(FsAction::Usage)).await?;
        match response.body {
            ResponseBody::Fs(FsResponse::Usage(usage)) => Ok(usage),
            other => Err(unexpected_body("fs usage", other)),
        }
    }

    pub async fn fs_upload(
        &mut self,
        path: &str,
        local_path: &Path,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        let (crc32, size) = preflight_crc32(local_path)?;

        self.conn
            .request_xfer(Request::Fs(FsAction::Upload {
                path: path.to_string(),
                crc32,
                size,
            }))
            .await?;

        self.upload_data_phase(local_path, size, progress).await
    }

    pub async fn fs_download(
        &mut self,
        path: &str,
        progress: &mut dyn Progress,
    ) -> Result<Vec<u8>> {
        fs::validate_path(path).map_err(Error::MalformedResponse)?;
        let response = self
            .conn
            .request_xfer(Request::Fs(FsAction::Download {
                path: path.to_string(),
            }))
            .await?;
        let size = match response.body {
            ResponseBody::Fs(FsResponse::DownloadStart { size }) => size,
            other => return Err(unexpected_body("fs download", other)),
        };
        self.download_data_phase(size, progress).await
    }

    // ---- Bulk-transfer data phase ---------------------------------------

    /// Stream `local_path` to the badge in `CHUNK_MAX_SIZE` pieces, aborting
    /// the transfer (without sending `Finish`) on the first error.
    async fn upload_data_phase(
        &mut self,
        local_path: &Path,
        size: u64,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let mut file =
            std::fs::File::open(local_path).map_err(|e| Error::Communication(e.to_string()))?;
        let mut position: u64 = 0;
        let mut buf = vec![0u8; CHUNK_MAX_SIZE];

        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Error::Communication(e.to_string()))?;
            if n == 0 {
                break;
            }
            let chunk = Chunk {
                position,
                data: buf[..n].to_vec(),
            };
            if let Err(e) = self.conn.request_chunk(Request::UploadChunk(chunk)).await {
                self.abort_transfer().await;
                return Err(e);
            }
            position += n as u64;
            progress.on_progress(position, size);
        }

        self.conn
            .request_xfer(Request::XferCtrl(XferCtrl::Finish))
            .await?;
        Ok(())
    }

    /// Pull `size` bytes from the badge in `CHUNK_MAX_SIZE` pieces, verifying
    /// strict position monotonicity on every chunk.
    async fn download_data_phase(
        &mut self,
        size: u64,
        progress: &mut dyn Progress,
    ) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(size as usize);

        while (data.len() as u64) < size {
            let response = match self
                .conn
                .request_chunk(Request::XferCtrl(XferCtrl::Continue))
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    self.abort_transfer().await;
                    return Err(e);
                }
            };
            let chunk = match response.body {
                ResponseBody::DownloadChunk(chunk) => chunk,
                other => {
                    self.abort_transfer().await;
                    return Err(unexpected_body("download chunk", other));
                }
            };
            if chunk.position != data.len() as u64 {
                self.abort_transfer().await;
                return Err(Error::MalformedResponse(format!(
                    "download chunk out of order: expected position {}, got {}",
                    data.len(),
                    chunk.position
                )));
            }
            if chunk.data.is_empty() {
                self.abort_transfer().await;
                return Err(Error::MalformedResponse(
                    "download chunk carried no data before transfer completed".into(),
                ));
            }
            data.extend_from_slice(&chunk.data);
            progress.on_progress(data.len() as u64, size);
        }

        self.conn
            .request_xfer(Request::XferCtrl(XferCtrl::Finish))
            .await?;
        Ok(data)
    }

    /// Best-effort abort notification; the connection is already in an error
    /// state by the time this is called, so failures here are swallowed.
    async fn abort_transfer(&mut self) {
        let _ = self
            .conn
            .request_xfer(Request::XferCtrl(XferCtrl::Abort))
            .await;
    }
}

/// Compute a local file's CRC32 and size without holding it entirely in
/// memory, reading in `PREFLIGHT_READ_SIZE` pieces.
fn preflight_crc32(path: &Path) -> Result<(u32, u64)> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::Communication(e.to_string()))?;
    let mut digest = CRC32.digest();
    let mut size: u64 = 0;
    let mut buf = vec![0u8; PREFLIGHT_READ_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::Communication(e.to_string()))?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
        size += n as u64;
    }
    Ok((digest.finalize(), size))
}

fn unexpected_body(op: &str, body: ResponseBody) -> Error {
    Error::MalformedResponse(format!("{op}: unexpected response body {body:?}"))
}
