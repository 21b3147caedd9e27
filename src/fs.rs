//! General-purpose hierarchical filesystem (FS) domain types.

use serde::{Deserialize, Serialize};

/// Upper bound, in bytes, on an FS path.
pub const MAX_PATH_LEN: usize = 1023;

/// A directory entry as returned by `fs list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsDirent {
    pub name: String,
    pub is_dir: bool,
}

/// File or directory metadata as returned by `fs stat`. Times are milliseconds
/// since the Unix epoch.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FsStat {
    pub is_dir: bool,
    pub size: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub atime: u64,
}

/// Usage statistics shared by FS and AppFS `usage` queries.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FsUsage {
    pub used: u64,
    pub size: u64,
}

/// Host → device FS request bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FsAction {
    List { path: String, list_offset: u32 },
    Stat { path: String },
    Crc32 { path: String },
    Delete { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Upload { path: String, crc32: u32, size: u64 },
    Download { path: String },
    Usage,
}

/// Device → host FS response bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FsResponse {
    Void,
    List { entries: Vec<FsDirent>, total: u32 },
    Stat(FsStat),
    Crc32(u32),
    Usage(FsUsage),
    /// Initiation response for a download: total size of the file to follow.
    DownloadStart { size: u64 },
}

pub(crate) fn validate_path(path: &str) -> Result<(), String> {
    if path.contains('\0') {
        return Err("file path cannot contain null bytes".into());
    }
    if path.len() > MAX_PATH_LEN {
        return Err(format!("file path cannot exceed {MAX_PATH_LEN} bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_rejects_null_byte_and_oversized_input() {
        assert!(validate_path("/apps/snake\0").is_err());
        assert!(validate_path(&format!("/{}", "a".repeat(MAX_PATH_LEN))).is_err());
        assert!(validate_path("/apps/snake.bin").is_ok());
    }
}
