//! diagwire-core - CAN frame model and frame channel abstraction
//!
//! This crate holds the leaf of the diagwire stack: immutable link-layer
//! frames and the duplex [`FrameChannel`] every upper layer talks through.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  diagwire-uds        (UDS client / server)   │
//! ├──────────────────────────────────────────────┤
//! │  diagwire-isotp      (ISO 15765-2 transport) │   diagwire-exchange
//! ├──────────────────────────────────────────────┤   (retry / ack over
//! │  diagwire-core       FrameChannel            │    raw or ISO-TP)
//! │   ├─ VirtualBus      (in-process bus)        │
//! │   └─ SocketCanChannel (Linux, feature)       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod error;
pub mod filter;
pub mod frame;

pub use channel::virtual_bus::{VirtualBus, VirtualChannel};
pub use channel::FrameChannel;
pub use error::ChannelError;
pub use filter::HardwareFilter;
pub use frame::{fd_length_for, CanId, Frame, CLASSIC_MAX_LEN, FD_MAX_LEN};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use channel::socketcan::SocketCanChannel;
