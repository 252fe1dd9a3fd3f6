//! Frame channel abstraction
//!
//! This module provides the duplex link every upper layer sends and receives
//! frames through:
//! - Virtual bus for in-process peers and tests
//! - SocketCAN raw socket (Linux, `socketcan` feature)
//!
//! # Example
//!
//! ```ignore
//! use diagwire_core::{CanId, Frame, FrameChannel, VirtualBus};
//!
//! let bus = VirtualBus::new();
//! let (a, b) = (bus.connect(), bus.connect());
//! a.send(&Frame::new(CanId::Standard(0x33), vec![0x01])?).await?;
//! let frame = b.receive(Duration::from_secs(1)).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ChannelError, Frame, HardwareFilter};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub mod virtual_bus;

/// Duplex link-layer channel
///
/// Implementations never retry; a failed send or receive is reported once
/// and the caller decides what to do with it.
#[async_trait]
pub trait FrameChannel: Send + Sync {
    /// Transmit one frame
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next accepted frame
    ///
    /// Returns `Ok(None)` when the timeout elapses without a frame.
    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ChannelError>;

    /// Replace the acceptance filters (empty list = accept everything)
    fn set_filters(&self, filters: &[HardwareFilter]) -> Result<(), ChannelError>;
}

#[async_trait]
impl<T: FrameChannel + ?Sized> FrameChannel for Arc<T> {
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        (**self).send(frame).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ChannelError> {
        (**self).receive(timeout).await
    }

    fn set_filters(&self, filters: &[HardwareFilter]) -> Result<(), ChannelError> {
        (**self).set_filters(filters)
    }
}
