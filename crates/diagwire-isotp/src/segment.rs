//! Send-side segmentation

use diagwire_core::{fd_length_for, CLASSIC_MAX_LEN};

use crate::pci::{FlowControl, Pci};
use crate::{ProtocolError, MAX_PAYLOAD_LEN};

/// Default filler for CAN FD frames rounded up to a valid length
const FD_FILLER: u8 = 0xCC;

/// Shape of transmitted frames: length, addressing prefix, padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Data length of a full frame (8, or an FD length up to 64)
    pub frame_len: usize,
    pub fd: bool,
    /// Extension byte prepended in extended/mixed addressing
    pub address_extension: Option<u8>,
    pub padding: Option<u8>,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            frame_len: CLASSIC_MAX_LEN,
            fd: false,
            address_extension: None,
            padding: None,
        }
    }
}

impl FrameLayout {
    fn offset(&self) -> usize {
        usize::from(self.address_extension.is_some())
    }

    /// Payload bytes in a single frame with a one-byte PCI
    fn short_single_capacity(&self) -> usize {
        CLASSIC_MAX_LEN - 1 - self.offset()
    }

    /// Largest payload that still fits a single frame
    pub fn single_capacity(&self) -> usize {
        if self.fd && self.frame_len > CLASSIC_MAX_LEN {
            self.frame_len - 2 - self.offset()
        } else {
            self.short_single_capacity()
        }
    }

    pub fn first_capacity(&self) -> usize {
        self.frame_len - 2 - self.offset()
    }

    pub fn consecutive_capacity(&self) -> usize {
        self.frame_len - 1 - self.offset()
    }

    fn start(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.frame_len);
        data.extend(self.address_extension);
        data
    }

    /// Pad a finished frame according to the layout
    fn finish(&self, mut data: Vec<u8>) -> Vec<u8> {
        if self.fd {
            // FD frames can only carry certain lengths
            let wanted = if self.padding.is_some() {
                data.len().max(CLASSIC_MAX_LEN)
            } else {
                data.len()
            };
            let target = fd_length_for(wanted).unwrap_or(self.frame_len);
            data.resize(target, self.padding.unwrap_or(FD_FILLER));
        } else if let Some(byte) = self.padding {
            data.resize(CLASSIC_MAX_LEN, byte);
        }
        data
    }

    /// Encode a flow-control frame
    pub fn flow_control(&self, fc: FlowControl) -> Vec<u8> {
        let mut data = self.start();
        Pci::FlowControl(fc).encode(&mut data, false);
        self.finish(data)
    }
}

/// Iterator over the frames of one outgoing payload
///
/// Yields the single or first frame, then every consecutive frame with its
/// sequence number running 1, 2, ... 15, 0, 1, ...
pub struct Segmenter<'a> {
    payload: &'a [u8],
    layout: FrameLayout,
    offset: usize,
    next_seq: u8,
    started: bool,
}

impl<'a> Segmenter<'a> {
    pub fn new(payload: &'a [u8], layout: FrameLayout) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            payload,
            layout,
            offset: 0,
            next_seq: 1,
            started: false,
        })
    }

    pub fn is_single_frame(&self) -> bool {
        self.payload.len() <= self.layout.single_capacity()
    }

    /// Number of frames the payload needs, first frame included
    pub fn frame_count(&self) -> usize {
        if self.is_single_frame() {
            return 1;
        }
        let rest = self.payload.len() - self.layout.first_capacity();
        1 + rest.div_ceil(self.layout.consecutive_capacity())
    }

    fn first(&mut self) -> Vec<u8> {
        let len = self.payload.len();
        let mut data = self.layout.start();

        if self.is_single_frame() {
            let escape = len > self.layout.short_single_capacity();
            Pci::Single { len }.encode(&mut data, escape);
            data.extend_from_slice(self.payload);
            self.offset = len;
        } else {
            let chunk = self.layout.first_capacity();
            Pci::First { len }.encode(&mut data, false);
            data.extend_from_slice(&self.payload[..chunk]);
            self.offset = chunk;
        }
        self.layout.finish(data)
    }

    fn consecutive(&mut self) -> Vec<u8> {
        let end = (self.offset + self.layout.consecutive_capacity()).min(self.payload.len());
        let mut data = self.layout.start();
        Pci::Consecutive { seq: self.next_seq }.encode(&mut data, false);
        data.extend_from_slice(&self.payload[self.offset..end]);

        self.offset = end;
        self.next_seq = (self.next_seq + 1) & 0x0F;
        self.layout.finish(data)
    }
}

impl Iterator for Segmenter<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            return Some(self.first());
        }
        if self.offset >= self.payload.len() {
            return None;
        }
        Some(self.consecutive())
    }
}

/// Split a payload into frame data, first frame first
pub fn segment(payload: &[u8], layout: &FrameLayout) -> Result<Vec<Vec<u8>>, ProtocolError> {
    Ok(Segmenter::new(payload, *layout)?.collect())
}
