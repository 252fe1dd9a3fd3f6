//! diagwire-isotp - ISO 15765-2 transport
//!
//! Segments payloads of up to 4095 bytes into CAN frames and reassembles them
//! on the way back, driving the flow-control handshake in both directions.
//!
//! ```text
//!   send(payload)                         receive(timeout)
//!        │                                      ▲
//!   ┌────┴─────┐   FlowControl (mpsc)    ┌──────┴──────┐
//!   │ segment  │◄────────────────────────│    pump     │  background task
//!   │ + pacing │                         │ Reassembler │
//!   └────┬─────┘                         └──────┬──────┘
//!        │        write lock                    │
//!        └──────────────► FrameChannel ◄────────┘
//! ```
//!
//! The pure pieces ([`pci`], [`segment`], [`Reassembler`]) carry no I/O and
//! can be used on their own.

pub mod config;
pub mod error;
pub mod pci;
pub mod reassemble;
pub mod segment;
pub mod transport;

pub use config::{Address, AddressingMode, FlowControlConfig, IsoTpConfig};
pub use error::{ProtocolError, TransportError};
pub use pci::{FlowControl, FlowStatus, Pci, StMin};
pub use reassemble::{Reassembler, RxEvent};
pub use segment::{segment, FrameLayout, Segmenter};
pub use transport::{IsoTpTransport, PayloadTransport};

/// Largest payload a 12-bit first-frame length can declare
pub const MAX_PAYLOAD_LEN: usize = 4095;
