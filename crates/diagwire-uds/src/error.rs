//! Diagnostic layer errors

use diagwire_isotp::TransportError;
use thiserror::Error;

use crate::NegativeResponseCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiagnosticError {
    #[error("Negative response: {code} (0x{code:02X}) for service 0x{service:02X}")]
    Negative {
        service: u8,
        code: NegativeResponseCode,
    },

    #[error("Response timeout")]
    Timeout,

    #[error("Unsupported data identifier 0x{0:04X}")]
    UnsupportedIdentifier(u16),

    #[error("Data identifier 0x{0:04X} is already registered")]
    DuplicateIdentifier(u16),

    #[error("Codec for 0x{did:04X} expects {expected} bytes, got {actual}")]
    CodecLengthMismatch {
        did: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
