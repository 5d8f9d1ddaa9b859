//! Decoding of strings read out of the target

use encoding_rs::UTF_16LE;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Encoding of NUL-terminated strings in the target
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StringEncoding {
    /// Native runtime strings (class names, namespaces, object names)
    #[default]
    Utf8,
    /// Managed `System.String` payloads
    Utf16Le,
}

/// Decode a NUL-terminated string, stopping at the buffer end if no terminator is found
pub fn decode_c_string(bytes: &[u8], encoding: StringEncoding) -> String {
    match encoding {
        StringEncoding::Utf8 => {
            let len = memchr::memchr(0, bytes).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..len]).into_owned()
        }
        StringEncoding::Utf16Le => {
            let len = bytes
                .chunks_exact(2)
                .position(|unit| unit == [0, 0])
                .map(|pos| pos * 2)
                .unwrap_or(bytes.len() & !1);
            let (decoded, _) = UTF_16LE.decode_without_bom_handling(&bytes[..len]);
            decoded.into_owned()
        }
    }
}
