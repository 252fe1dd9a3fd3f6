//! Send/receive pairs the exchange controller runs over

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use diagwire_core::{CanId, ChannelError, Frame, FrameChannel, HardwareFilter};
use diagwire_isotp::PayloadTransport;

use crate::LinkError;

/// A duplex message link
#[async_trait]
pub trait ExchangeLink: Send + Sync {
    type Message: Send + Sync + fmt::Debug;

    async fn transmit(&self, message: &Self::Message) -> Result<(), LinkError>;

    /// Wait up to `timeout` for the next inbound message
    async fn receive(&self, timeout: Duration) -> Result<Option<Self::Message>, LinkError>;
}

/// Single CAN frames, no transport protocol
pub struct RawLink {
    channel: Arc<dyn FrameChannel>,
    tx_id: CanId,
}

impl RawLink {
    pub fn new(channel: Arc<dyn FrameChannel>, tx_id: CanId) -> Self {
        Self { channel, tx_id }
    }

    /// Only accept frames carrying `rx_id`
    pub fn listen_to(self, rx_id: CanId) -> Result<Self, ChannelError> {
        let filter = match rx_id {
            CanId::Standard(id) => HardwareFilter::exact_standard(id),
            CanId::Extended(id) => HardwareFilter::exact_extended(id),
        };
        self.channel.set_filters(&[filter])?;
        Ok(self)
    }

    pub fn tx_id(&self) -> CanId {
        self.tx_id
    }

    /// A classic frame with this link's identifier
    pub fn frame(&self, data: &[u8]) -> Result<Frame, ChannelError> {
        Frame::new(self.tx_id, data.to_vec())
    }
}

#[async_trait]
impl ExchangeLink for RawLink {
    type Message = Frame;

    async fn transmit(&self, message: &Frame) -> Result<(), LinkError> {
        Ok(self.channel.send(message).await?)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, LinkError> {
        Ok(self.channel.receive(timeout).await?)
    }
}

/// Complete payloads over a transport such as ISO-TP
pub struct PayloadLink {
    transport: Arc<dyn PayloadTransport>,
}

impl PayloadLink {
    pub fn new(transport: Arc<dyn PayloadTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ExchangeLink for PayloadLink {
    type Message = Bytes;

    async fn transmit(&self, message: &Bytes) -> Result<(), LinkError> {
        Ok(self.transport.send(message).await?)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Bytes>, LinkError> {
        Ok(self.transport.receive(timeout).await?)
    }
}
