//! SocketCAN raw-frame channel

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use socketcan::{
    CanFilter, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Id, Socket,
    SocketOptions, StandardId,
};

use tokio::io::unix::AsyncFd;

use super::FrameChannel;
use crate::{CanId, ChannelError, Frame, HardwareFilter};

/// Extended frame flag in the kernel's `can_id` encoding
const CAN_EFF_FLAG: u32 = 0x8000_0000;

/// Raw SocketCAN channel (classic CAN frames)
///
/// The socket is non-blocking and registered with the tokio reactor, so a
/// pending `receive` never delays a concurrent `send`.
pub struct SocketCanChannel {
    interface: String,
    socket: AsyncFd<CanSocket>,
}

impl SocketCanChannel {
    /// Open `interface`; must be called inside a tokio runtime
    pub fn open(interface: &str) -> Result<Self, ChannelError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            ChannelError::HardwareUnavailable(format!(
                "Failed to open CAN socket on {}: {}",
                interface, e
            ))
        })?;

        socket
            .set_nonblocking(true)
            .map_err(|e| ChannelError::from_io("Failed to set non-blocking", &e))?;
        let socket = AsyncFd::new(socket)
            .map_err(|e| ChannelError::from_io("Failed to register CAN socket", &e))?;

        tracing::info!(interface, "SocketCAN channel opened");

        Ok(Self {
            interface: interface.to_string(),
            socket,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn to_socketcan(frame: &Frame) -> Result<CanFrame, ChannelError> {
        if frame.is_fd() {
            return Err(ChannelError::InvalidParameter(
                "CAN FD frames are not supported on a raw classic socket".to_string(),
            ));
        }

        let id = match frame.id() {
            CanId::Standard(raw) => Id::Standard(StandardId::new(raw).ok_or_else(|| {
                ChannelError::InvalidParameter(format!("Invalid standard CAN ID: 0x{:X}", raw))
            })?),
            CanId::Extended(raw) => Id::Extended(ExtendedId::new(raw).ok_or_else(|| {
                ChannelError::InvalidParameter(format!("Invalid extended CAN ID: 0x{:X}", raw))
            })?),
        };

        CanFrame::new(id, frame.data())
            .ok_or_else(|| ChannelError::InvalidParameter(format!("Invalid CAN frame: {}", frame)))
    }

    fn from_socketcan(frame: &CanFrame) -> Result<Option<Frame>, ChannelError> {
        match frame {
            CanFrame::Data(data_frame) => {
                let id = CanId::new(data_frame.raw_id(), data_frame.is_extended())?;
                Frame::new(id, data_frame.data().to_vec()).map(Some)
            }
            // Remote frames carry no payload for the diagnostic stack
            CanFrame::Remote(_) => Ok(None),
            CanFrame::Error(err) => Err(ChannelError::Transient(format!(
                "CAN error frame received: 0x{:08X}",
                err.raw_id()
            ))),
        }
    }
}

#[async_trait]
impl FrameChannel for SocketCanChannel {
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        let can_frame = Self::to_socketcan(frame)?;

        loop {
            let mut guard = self
                .socket
                .writable()
                .await
                .map_err(|e| ChannelError::from_io("CAN socket not writable", &e))?;

            match guard.try_io(|socket| socket.get_ref().write_frame(&can_frame)) {
                Ok(result) => {
                    return result.map_err(|e| ChannelError::from_io("CAN write failed", &e))
                }
                // Kernel TX queue full; wait for the next writable edge
                Err(_would_block) => continue,
            }
        }
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ChannelError> {
        let read = async {
            loop {
                let mut guard = self
                    .socket
                    .readable()
                    .await
                    .map_err(|e| ChannelError::from_io("CAN socket not readable", &e))?;

                match guard.try_io(|socket| socket.get_ref().read_frame()) {
                    Ok(Ok(frame)) => match Self::from_socketcan(&frame)? {
                        Some(frame) => return Ok(frame),
                        None => continue,
                    },
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(Err(e)) => return Err(ChannelError::from_io("CAN read failed", &e)),
                    Err(_would_block) => continue,
                }
            }
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    fn set_filters(&self, filters: &[HardwareFilter]) -> Result<(), ChannelError> {
        let socket = self.socket.get_ref();

        if filters.is_empty() {
            return socket
                .set_filter_accept_all()
                .map_err(|e| ChannelError::from_io("Failed to clear filters", &e));
        }

        let can_filters: Vec<CanFilter> = filters
            .iter()
            .map(|f| {
                if f.extended {
                    CanFilter::new(f.id | CAN_EFF_FLAG, f.mask | CAN_EFF_FLAG)
                } else {
                    CanFilter::new(f.id, f.mask | CAN_EFF_FLAG)
                }
            })
            .collect();

        socket
            .set_filters(&can_filters)
            .map_err(|e| ChannelError::from_io("Failed to install filters", &e))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tokio::time::Instant;

    const INTERFACE: &str = "vcan0";

    fn frame(id: u16, data: &[u8]) -> Frame {
        Frame::new(CanId::Standard(id), data.to_vec()).unwrap()
    }

    #[tokio::test]
    #[ignore = "needs a vcan0 interface"]
    async fn test_send_is_not_held_up_by_pending_receive() {
        let local = Arc::new(SocketCanChannel::open(INTERFACE).unwrap());
        let peer = SocketCanChannel::open(INTERFACE).unwrap();
        peer.set_filters(&[HardwareFilter::exact_standard(0x33)]).unwrap();
        local.set_filters(&[HardwareFilter::exact_standard(0x34)]).unwrap();

        let waiting = local.clone();
        let pending = tokio::spawn(async move { waiting.receive(Duration::from_secs(5)).await });

        let start = Instant::now();
        for i in 0..50u8 {
            local.send(&frame(0x33, &[0x21, i])).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(500));

        for i in 0..50u8 {
            let got = peer.receive(Duration::from_secs(1)).await.unwrap();
            assert_eq!(got, Some(frame(0x33, &[0x21, i])));
        }

        peer.send(&frame(0x34, &[0x30, 0x00, 0x00])).await.unwrap();
        let answered = pending.await.unwrap().unwrap();
        assert_eq!(answered, Some(frame(0x34, &[0x30, 0x00, 0x00])));
    }

    #[tokio::test]
    #[ignore = "needs a vcan0 interface"]
    async fn test_elapsed_receive_does_not_consume_later_frame() {
        let local = SocketCanChannel::open(INTERFACE).unwrap();
        let peer = SocketCanChannel::open(INTERFACE).unwrap();
        local.set_filters(&[HardwareFilter::exact_standard(0x34)]).unwrap();

        assert_eq!(local.receive(Duration::from_millis(20)).await.unwrap(), None);

        peer.send(&frame(0x34, &[0x01])).await.unwrap();
        let got = local.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, Some(frame(0x34, &[0x01])));
    }
}
