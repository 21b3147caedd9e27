//! Application-image filesystem (AppFS) domain types.

use serde::{Deserialize, Serialize};

use crate::fs::FsUsage;

/// Upper bound, in bytes, on an AppFS slug.
pub const MAX_SLUG_LEN: usize = 47;
/// Upper bound, in bytes, on an AppFS title.
pub const MAX_TITLE_LEN: usize = 63;
/// Upper bound, in bytes, on the argument string passed to a launched app.
pub const MAX_ARG_LEN: usize = 127;

/// AppFS entry metadata. Slug is the primary key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppfsMetadata {
    pub slug: String,
    pub title: String,
    pub version: u16,
    pub size: u64,
}

/// Host → device AppFS request bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AppfsAction {
    List { list_offset: u32 },
    Stat { slug: String },
    Crc32 { slug: String },
    Delete { slug: String },
    Upload { metadata: AppfsMetadata, crc32: u32 },
    Download { slug: String },
    Usage,
}

/// Device → host AppFS response bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AppfsResponse {
    Void,
    List {
        entries: Vec<AppfsMetadata>,
        total: u32,
    },
    Stat(AppfsMetadata),
    Crc32(u32),
    Usage(FsUsage),
    /// Initiation response for a download: total size of the image to follow.
    DownloadStart {
        size: u64,
    },
}

pub(crate) fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("AppFS slug cannot be empty".into());
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(format!("AppFS slug cannot be longer than {MAX_SLUG_LEN} bytes"));
    }
    if slug.contains('\0') {
        return Err("AppFS slug cannot contain null bytes".into());
    }
    Ok(())
}

pub(crate) fn validate_title(title: &str) -> Result<(), String> {
    if title.is_empty() {
        return Err("AppFS title cannot be empty".into());
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(format!(
            "AppFS title cannot be longer than {MAX_TITLE_LEN} bytes"
        ));
    }
    if title.contains('\0') {
        return Err("AppFS title cannot contain null bytes".into());
    }
    Ok(())
}

pub(crate) fn validate_arg(arg: &str) -> Result<(), String> {
    if arg.len() > MAX_ARG_LEN {
        return Err(format!("app arg cannot be longer than {MAX_ARG_LEN} bytes"));
    }
    if arg.contains('\0') {
        return Err("app arg cannot contain null bytes".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_bounds_are_enforced() {
        assert!(validate_slug("").is_err());
        assert!(validate_slug(&"a".repeat(MAX_SLUG_LEN + 1)).is_err());
        assert!(validate_slug("snake-game").is_ok());
    }

    #[test]
    fn title_rejects_null_byte() {
        assert!(validate_title("Snake\0Game").is_err());
    }

    #[test]
    fn arg_rejects_oversized_and_null_byte() {
        assert!(validate_arg(&"a".repeat(MAX_ARG_LEN + 1)).is_err());
        assert!(validate_arg("has\0null").is_err());
        assert!(validate_arg("").is_ok());
        assert!(validate_arg("level=3").is_ok());
    }
}
