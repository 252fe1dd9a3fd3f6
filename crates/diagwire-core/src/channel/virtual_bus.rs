//! In-process virtual CAN bus

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error as broadcast_error};

use super::FrameChannel;
use crate::filter::accepts;
use crate::{ChannelError, Frame, HardwareFilter};

const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct BusFrame {
    origin: u64,
    frame: Frame,
}

struct BusInner {
    /// `None` once the bus has been shut down
    sender: Mutex<Option<broadcast::Sender<BusFrame>>>,
    next_endpoint: AtomicU64,
}

/// In-process broadcast bus
///
/// Every frame sent by one endpoint is delivered to all other endpoints
/// connected at that time. Like a real CAN controller, an endpoint does not
/// receive its own frames.
#[derive(Clone)]
pub struct VirtualBus {
    inner: Arc<BusInner>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose endpoints buffer at most `capacity` unread frames
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                sender: Mutex::new(Some(sender)),
                next_endpoint: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a new endpoint to the bus
    pub fn connect(&self) -> VirtualChannel {
        let receiver = self
            .inner
            .sender
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe);
        VirtualChannel {
            endpoint: self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed),
            bus: self.inner.clone(),
            receiver: tokio::sync::Mutex::new(receiver),
            filters: RwLock::new(Vec::new()),
        }
    }

    /// Take the bus down; every endpoint fails with `HardwareUnavailable`
    pub fn shutdown(&self) {
        if self.inner.sender.lock().take().is_some() {
            tracing::debug!("Virtual bus shut down");
        }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint of a [`VirtualBus`]
pub struct VirtualChannel {
    endpoint: u64,
    bus: Arc<BusInner>,
    receiver: tokio::sync::Mutex<Option<broadcast::Receiver<BusFrame>>>,
    filters: RwLock<Vec<HardwareFilter>>,
}

impl VirtualChannel {
    fn bus_down() -> ChannelError {
        ChannelError::HardwareUnavailable("Virtual bus is shut down".to_string())
    }
}

#[async_trait]
impl FrameChannel for VirtualChannel {
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        let guard = self.bus.sender.lock();
        let sender = guard.as_ref().ok_or_else(Self::bus_down)?;

        // No receivers is not an error: the frame simply goes unheard
        let _ = sender.send(BusFrame {
            origin: self.endpoint,
            frame: frame.clone(),
        });
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(Self::bus_down)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match tokio::time::timeout(remaining, receiver.recv()).await {
                Ok(Ok(bus_frame)) => {
                    if bus_frame.origin == self.endpoint {
                        continue;
                    }
                    if !accepts(&self.filters.read(), &bus_frame.frame) {
                        continue;
                    }
                    return Ok(Some(bus_frame.frame));
                }
                Ok(Err(broadcast_error::RecvError::Lagged(missed))) => {
                    tracing::warn!(endpoint = self.endpoint, missed, "Virtual bus overrun");
                    continue;
                }
                Ok(Err(broadcast_error::RecvError::Closed)) => {
                    return Err(Self::bus_down());
                }
                Err(_) => return Ok(None),
            }
        }
    }

    fn set_filters(&self, filters: &[HardwareFilter]) -> Result<(), ChannelError> {
        *self.filters.write() = filters.to_vec();
        Ok(())
    }
}
