//! NVS (Non-Volatile Storage) domain types.

use serde::{Deserialize, Serialize};

/// Upper bound, in bytes, on an NVS namespace or key.
pub const MAX_NS_KEY_LEN: usize = 15;
/// Upper bound, in bytes, on an NVS string value.
pub const MAX_STRING_LEN: usize = 4095;
/// Upper bound, in bytes, on an NVS blob value.
pub const MAX_BLOB_LEN: usize = 4096;

/// The type tag of an [`NvsValue`], used to request a read without already
/// knowing the stored type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NvsValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    String,
    Blob,
}

impl std::fmt::Display for NvsValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NvsValueType::U8 => "u8",
            NvsValueType::I8 => "i8",
            NvsValueType::U16 => "u16",
            NvsValueType::I16 => "i16",
            NvsValueType::U32 => "u32",
            NvsValueType::I32 => "i32",
            NvsValueType::U64 => "u64",
            NvsValueType::I64 => "i64",
            NvsValueType::String => "string",
            NvsValueType::Blob => "blob",
        };
        f.write_str(s)
    }
}

/// A value stored in NVS, modeled as a plain tagged union over its storage
/// type rather than a packed numeric representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NvsValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    String(String),
    Blob(Vec<u8>),
}

impl NvsValue {
    pub fn value_type(&self) -> NvsValueType {
        match self {
            NvsValue::U8(_) => NvsValueType::U8,
            NvsValue::I8(_) => NvsValueType::I8,
            NvsValue::U16(_) => NvsValueType::U16,
            NvsValue::I16(_) => NvsValueType::I16,
            NvsValue::U32(_) => NvsValueType::U32,
            NvsValue::I32(_) => NvsValueType::I32,
            NvsValue::U64(_) => NvsValueType::U64,
            NvsValue::I64(_) => NvsValueType::I64,
            NvsValue::String(_) => NvsValueType::String,
            NvsValue::Blob(_) => NvsValueType::Blob,
        }
    }

    /// Validate the size bounds before any bytes hit the wire.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            NvsValue::String(s) if s.len() > MAX_STRING_LEN => {
                Err(format!("NVS string exceeds {MAX_STRING_LEN} bytes"))
            }
            NvsValue::Blob(b) if b.len() > MAX_BLOB_LEN => {
                Err(format!("NVS blob exceeds {MAX_BLOB_LEN} bytes"))
            }
            _ => Ok(()),
        }
    }
}

/// One entry returned by `nvs list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NvsEntry {
    pub namespace: String,
    pub key: String,
    pub value_type: NvsValueType,
}

/// Host → device NVS request bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NvsAction {
    Read {
        namespace: String,
        key: String,
        value_type: NvsValueType,
    },
    Write {
        namespace: String,
        key: String,
        value: NvsValue,
    },
    List {
        namespace: Option<String>,
        list_offset: u32,
    },
    Delete {
        namespace: String,
        key: String,
    },
}

/// Device → host NVS response bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NvsResponse {
    Void,
    Read(NvsValue),
    List { entries: Vec<NvsEntry>, total: u32 },
}

pub(crate) fn validate_ns_key(field: &str, s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err(format!("NVS {field} cannot be empty"));
    }
    if s.len() > MAX_NS_KEY_LEN {
        return Err(format!(
            "NVS {field} cannot be longer than {MAX_NS_KEY_LEN} bytes"
        ));
    }
    if s.contains('\0') {
        return Err(format!("NVS {field} cannot contain null bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ns_key_rejects_oversized_and_empty() {
        assert!(validate_ns_key("key", "").is_err());
        assert!(validate_ns_key("key", &"a".repeat(MAX_NS_KEY_LEN + 1)).is_err());
        assert!(validate_ns_key("key", "wifi").is_ok());
    }

    #[test]
    fn string_value_enforces_max_len() {
        assert!(NvsValue::String("ok".to_string()).validate().is_ok());
        let too_long = NvsValue::String("x".repeat(MAX_STRING_LEN + 1));
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn value_type_matches_variant() {
        assert_eq!(NvsValue::U32(1).value_type(), NvsValueType::U32);
        assert_eq!(NvsValue::Blob(vec![]).value_type(), NvsValueType::Blob);
    }
}
