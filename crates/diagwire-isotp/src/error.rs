//! ISO-TP error types

use std::time::Duration;

use diagwire_core::ChannelError;
use thiserror::Error;

/// Malformed or out-of-sequence framing
///
/// The affected transfer is aborted and returns to idle; the transport
/// itself stays usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown PCI byte: 0x{0:02X}")]
    UnknownPci(u8),

    #[error("Malformed {kind} frame: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Invalid flow status: {0}")]
    InvalidFlowStatus(u8),

    #[error("Sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("Consecutive frame timeout after {received} of {total} bytes")]
    ConsecutiveFrameTimeout { received: usize, total: usize },

    #[error("Reception interrupted by a new message after {received} of {total} bytes")]
    Interrupted { received: usize, total: usize },

    #[error("Declared length {declared} exceeds the receive limit of {max} bytes")]
    Overflow { declared: usize, max: usize },

    #[error("Payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("No flow control within {0:?}")]
    FlowControlTimeout(Duration),

    #[error("Peer sent {0} wait frames, more than allowed")]
    TooManyWaits(u16),

    #[error("Peer reported overflow")]
    PeerOverflow,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProtocolError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by [`crate::IsoTpTransport`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Transport not started")]
    NotStarted,
}

impl TransportError {
    /// Channel failures end the session; everything else only ends a transfer
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Channel(_))
    }
}
