//! Receive-side reassembly state machine

use bytes::{Bytes, BytesMut};

use crate::pci::{FlowControl, Pci};
use crate::{ProtocolError, MAX_PAYLOAD_LEN};

/// What the receiver must do after feeding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// A payload is complete
    Complete(Bytes),
    /// Answer with a continue-to-send flow control
    SendFlowControl,
    /// Consecutive frame accepted, more expected
    Continue,
    /// Flow control addressed to our send direction
    FlowControl(FlowControl),
    /// Frame carried nothing for us (stray consecutive frame)
    Ignored,
}

#[derive(Debug)]
enum State {
    Idle,
    Receiving {
        total: usize,
        buffer: BytesMut,
        next_seq: u8,
        in_block: u8,
    },
}

/// Pure ISO-TP reassembler
///
/// Fed with frame data (address extension already stripped). Any framing
/// error during a reception discards the partial payload and returns to idle.
#[derive(Debug)]
pub struct Reassembler {
    state: State,
    block_size: u8,
    max_payload_len: usize,
    interrupted: Option<ProtocolError>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(0, MAX_PAYLOAD_LEN)
    }
}

impl Reassembler {
    /// `block_size` is the value we advertise in our own flow control
    pub fn new(block_size: u8, max_payload_len: usize) -> Self {
        Self {
            state: State::Idle,
            block_size,
            max_payload_len,
            interrupted: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// `(received, total)` of the reception in progress
    pub fn progress(&self) -> Option<(usize, usize)> {
        match &self.state {
            State::Idle => None,
            State::Receiving { total, buffer, .. } => Some((buffer.len(), *total)),
        }
    }

    /// Drop the reception in progress, returning how far it got
    pub fn abort(&mut self) -> Option<(usize, usize)> {
        let progress = self.progress();
        self.state = State::Idle;
        progress
    }

    /// Reception that the last frame cut short, if any
    pub fn take_interrupted(&mut self) -> Option<ProtocolError> {
        self.interrupted.take()
    }

    pub fn on_frame(&mut self, data: &[u8]) -> Result<RxEvent, ProtocolError> {
        let (pci, header) = match Pci::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.state = State::Idle;
                return Err(e);
            }
        };
        let body = &data[header..];

        match pci {
            Pci::Single { len } => {
                self.interrupt();
                Ok(RxEvent::Complete(Bytes::copy_from_slice(&body[..len])))
            }
            Pci::First { len } => {
                self.interrupt();
                self.on_first(len, body)
            }
            Pci::Consecutive { seq } => self.on_consecutive(seq, body),
            Pci::FlowControl(fc) => Ok(RxEvent::FlowControl(fc)),
        }
    }

    /// A new message replaces the one in progress
    fn interrupt(&mut self) {
        if let Some((received, total)) = self.abort() {
            self.interrupted = Some(ProtocolError::Interrupted { received, total });
        }
    }

    fn on_first(&mut self, total: usize, body: &[u8]) -> Result<RxEvent, ProtocolError> {
        if total > self.max_payload_len {
            return Err(ProtocolError::Overflow {
                declared: total,
                max: self.max_payload_len,
            });
        }

        let chunk = body.len().min(total);
        if chunk == total {
            return Ok(RxEvent::Complete(Bytes::copy_from_slice(&body[..chunk])));
        }

        let mut buffer = BytesMut::with_capacity(total);
        buffer.extend_from_slice(&body[..chunk]);
        self.state = State::Receiving {
            total,
            buffer,
            next_seq: 1,
            in_block: 0,
        };
        Ok(RxEvent::SendFlowControl)
    }

    fn on_consecutive(&mut self, seq: u8, body: &[u8]) -> Result<RxEvent, ProtocolError> {
        let State::Receiving {
            total,
            buffer,
            next_seq,
            in_block,
        } = &mut self.state
        else {
            return Ok(RxEvent::Ignored);
        };

        if seq != *next_seq {
            let expected = *next_seq;
            self.state = State::Idle;
            return Err(ProtocolError::SequenceMismatch { expected, got: seq });
        }

        let wanted = (*total - buffer.len()).min(body.len());
        buffer.extend_from_slice(&body[..wanted]);
        *next_seq = (*next_seq + 1) & 0x0F;

        if buffer.len() == *total {
            let payload = std::mem::take(buffer).freeze();
            self.state = State::Idle;
            return Ok(RxEvent::Complete(payload));
        }

        *in_block = in_block.wrapping_add(1);
        if self.block_size > 0 && *in_block == self.block_size {
            *in_block = 0;
            return Ok(RxEvent::SendFlowControl);
        }
        Ok(RxEvent::Continue)
    }
}
