//! Link-layer CAN frames

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ChannelError;

/// Maximum data length of a classic CAN frame
pub const CLASSIC_MAX_LEN: usize = 8;
/// Maximum data length of a CAN FD frame
pub const FD_MAX_LEN: usize = 64;

/// Data lengths a CAN FD frame can actually carry on the wire
const FD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// CAN arbitration identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanId {
    /// 11-bit identifier
    Standard(u16),
    /// 29-bit identifier
    Extended(u32),
}

impl CanId {
    pub const MAX_STANDARD: u16 = 0x7FF;
    pub const MAX_EXTENDED: u32 = 0x1FFF_FFFF;

    pub fn standard(raw: u16) -> Result<Self, ChannelError> {
        if raw > Self::MAX_STANDARD {
            return Err(ChannelError::InvalidParameter(format!(
                "Standard CAN ID out of range: 0x{:X}",
                raw
            )));
        }
        Ok(Self::Standard(raw))
    }

    pub fn extended(raw: u32) -> Result<Self, ChannelError> {
        if raw > Self::MAX_EXTENDED {
            return Err(ChannelError::InvalidParameter(format!(
                "Extended CAN ID out of range: 0x{:X}",
                raw
            )));
        }
        Ok(Self::Extended(raw))
    }

    /// Build an identifier from its raw value and the extended flag
    pub fn new(raw: u32, extended: bool) -> Result<Self, ChannelError> {
        if extended {
            Self::extended(raw)
        } else {
            let raw = u16::try_from(raw).map_err(|_| {
                ChannelError::InvalidParameter(format!("Standard CAN ID out of range: 0x{:X}", raw))
            })?;
            Self::standard(raw)
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            Self::Standard(id) => u32::from(*id),
            Self::Extended(id) => *id,
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, Self::Extended(_))
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard(id) => write!(f, "0x{:03X}", id),
            Self::Extended(id) => write!(f, "0x{:08X}", id),
        }
    }
}

/// An immutable CAN or CAN FD frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: CanId,
    data: Bytes,
    fd: bool,
    padded: bool,
}

impl Frame {
    /// Create a classic CAN frame (0-8 data bytes)
    pub fn new(id: CanId, data: impl Into<Bytes>) -> Result<Self, ChannelError> {
        Self::build(id, data.into(), false)
    }

    /// Create a CAN FD frame (0-64 data bytes)
    pub fn new_fd(id: CanId, data: impl Into<Bytes>) -> Result<Self, ChannelError> {
        Self::build(id, data.into(), true)
    }

    fn build(id: CanId, data: Bytes, fd: bool) -> Result<Self, ChannelError> {
        let max = if fd { FD_MAX_LEN } else { CLASSIC_MAX_LEN };
        if data.len() > max {
            return Err(ChannelError::InvalidParameter(format!(
                "Frame data too long: {} bytes (max {})",
                data.len(),
                max
            )));
        }
        Ok(Self {
            id,
            data,
            fd,
            padded: false,
        })
    }

    /// Mark the frame as carrying padding bytes after its payload
    pub fn with_padding_flag(mut self) -> Self {
        self.padded = true;
        self
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap clone of the frame data
    pub fn payload(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    pub fn is_fd(&self) -> bool {
        self.fd
    }

    pub fn is_padded(&self) -> bool {
        self.padded
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.data.len())?;
        for byte in self.data.iter() {
            write!(f, " {:02X}", byte)?;
        }
        if self.fd {
            write!(f, " (FD)")?;
        }
        Ok(())
    }
}

/// Smallest CAN FD data length that can hold `len` bytes
pub fn fd_length_for(len: usize) -> Option<usize> {
    FD_LENGTHS.iter().copied().find(|&l| l >= len)
}
