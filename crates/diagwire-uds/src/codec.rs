//! DID value codecs

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DiagnosticError;

/// A decoded data identifier value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DidValue {
    Text(String),
    Unsigned(u64),
    Bytes(Vec<u8>),
}

impl fmt::Display for DidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Unsigned(value) => write!(f, "{} (0x{:X})", value, value),
            Self::Bytes(bytes) => write!(f, "{}", hex::encode_upper(bytes)),
        }
    }
}

impl From<&str> for DidValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<u64> for DidValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<Vec<u8>> for DidValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Encode/decode pair for one data identifier
pub trait DidCodec: Send + Sync + fmt::Debug {
    /// Encoded size in bytes; `None` if the value takes the rest of the record
    fn encoded_len(&self) -> Option<usize>;

    fn encode(&self, value: &DidValue) -> Result<Vec<u8>, DiagnosticError>;

    /// `data` is exactly `encoded_len()` bytes when the length is fixed
    fn decode(&self, data: &[u8]) -> Result<DidValue, DiagnosticError>;
}

/// Fixed-length ASCII string, NUL-padded on encode and trimmed on decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsciiCodec {
    len: usize,
}

impl AsciiCodec {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl DidCodec for AsciiCodec {
    fn encoded_len(&self) -> Option<usize> {
        Some(self.len)
    }

    fn encode(&self, value: &DidValue) -> Result<Vec<u8>, DiagnosticError> {
        let DidValue::Text(text) = value else {
            return Err(DiagnosticError::InvalidValue(format!(
                "ASCII codec needs text, got {:?}",
                value
            )));
        };
        if !text.is_ascii() {
            return Err(DiagnosticError::InvalidValue(format!(
                "Not ASCII: {:?}",
                text
            )));
        }
        if text.len() > self.len {
            return Err(DiagnosticError::InvalidValue(format!(
                "String must be at most {} characters, got {}",
                self.len,
                text.len()
            )));
        }
        let mut encoded = text.as_bytes().to_vec();
        encoded.resize(self.len, 0x00);
        Ok(encoded)
    }

    fn decode(&self, data: &[u8]) -> Result<DidValue, DiagnosticError> {
        if !data.is_ascii() {
            return Err(DiagnosticError::InvalidValue(format!(
                "Not ASCII: {}",
                hex::encode_upper(data)
            )));
        }
        let end = data.iter().rposition(|&b| b != 0x00).map_or(0, |i| i + 1);
        Ok(DidValue::Text(String::from_utf8_lossy(&data[..end]).into_owned()))
    }
}

/// Big-endian unsigned integer of 1, 2, 4 or 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedCodec {
    width: usize,
}

impl UnsignedCodec {
    pub fn new(width: usize) -> Result<Self, DiagnosticError> {
        match width {
            1 | 2 | 4 | 8 => Ok(Self { width }),
            other => Err(DiagnosticError::InvalidValue(format!(
                "Unsupported integer width: {}",
                other
            ))),
        }
    }

    /// Two-byte big-endian value
    pub fn u16() -> Self {
        Self { width: 2 }
    }
}

impl DidCodec for UnsignedCodec {
    fn encoded_len(&self) -> Option<usize> {
        Some(self.width)
    }

    fn encode(&self, value: &DidValue) -> Result<Vec<u8>, DiagnosticError> {
        let DidValue::Unsigned(value) = value else {
            return Err(DiagnosticError::InvalidValue(format!(
                "Integer codec needs a number, got {:?}",
                value
            )));
        };
        let bits = self.width * 8;
        if bits < 64 && *value >> bits != 0 {
            return Err(DiagnosticError::InvalidValue(format!(
                "{} does not fit in {} bytes",
                value, self.width
            )));
        }
        Ok(value.to_be_bytes()[8 - self.width..].to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<DidValue, DiagnosticError> {
        Ok(DidValue::Unsigned(
            data.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        ))
    }
}

/// Opaque bytes, fixed length or open-ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawCodec {
    len: Option<usize>,
}

impl RawCodec {
    pub fn fixed(len: usize) -> Self {
        Self { len: Some(len) }
    }

    pub fn open() -> Self {
        Self { len: None }
    }
}

impl DidCodec for RawCodec {
    fn encoded_len(&self) -> Option<usize> {
        self.len
    }

    fn encode(&self, value: &DidValue) -> Result<Vec<u8>, DiagnosticError> {
        let bytes = match value {
            DidValue::Bytes(bytes) => bytes.clone(),
            DidValue::Text(text) => text.as_bytes().to_vec(),
            DidValue::Unsigned(_) => {
                return Err(DiagnosticError::InvalidValue(
                    "Raw codec needs bytes or text".to_string(),
                ))
            }
        };
        match self.len {
            Some(len) if bytes.len() != len => Err(DiagnosticError::InvalidValue(format!(
                "Expected {} bytes, got {}",
                len,
                bytes.len()
            ))),
            _ => Ok(bytes),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<DidValue, DiagnosticError> {
        Ok(DidValue::Bytes(data.to_vec()))
    }
}

/// Codec description as written in configuration files
///
/// ```toml
/// codec = { kind = "ascii", len = 15 }
/// codec = { kind = "unsigned", width = 2 }
/// codec = { kind = "raw" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CodecSpec {
    Ascii {
        len: usize,
    },
    Unsigned {
        #[serde(default = "default_width")]
        width: usize,
    },
    Raw {
        #[serde(default)]
        len: Option<usize>,
    },
}

fn default_width() -> usize {
    2
}

impl CodecSpec {
    pub fn build(&self) -> Result<Arc<dyn DidCodec>, DiagnosticError> {
        Ok(match *self {
            Self::Ascii { len } => Arc::new(AsciiCodec::new(len)),
            Self::Unsigned { width } => Arc::new(UnsignedCodec::new(width)?),
            Self::Raw { len: Some(len) } => Arc::new(RawCodec::fixed(len)),
            Self::Raw { len: None } => Arc::new(RawCodec::open()),
        })
    }
}
