//! ISO-TP transport over a frame channel
//!
//! A background pump task owns the receive direction: it feeds incoming frames
//! to the [`Reassembler`], answers with flow control, routes the peer's flow
//! control to the sender and queues completed payloads for [`IsoTpTransport::receive`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use diagwire_core::{CanId, ChannelError, Frame, FrameChannel};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::pci::{FlowControl, FlowStatus};
use crate::reassemble::{Reassembler, RxEvent};
use crate::segment::{FrameLayout, Segmenter};
use crate::{IsoTpConfig, ProtocolError, TransportError};

/// How long the idle pump blocks on the channel before checking for shutdown
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Completed payloads waiting for `receive`
const RX_QUEUE_DEPTH: usize = 32;
const FC_QUEUE_DEPTH: usize = 8;

type RxItem = Result<Bytes, TransportError>;

/// Payload-level send/receive pair
///
/// The seam the diagnostic layer and the exchange controller are written
/// against.
#[async_trait]
pub trait PayloadTransport: Send + Sync {
    /// Transmit one complete payload
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next complete payload
    async fn receive(&self, timeout: Duration) -> Result<Option<Bytes>, TransportError>;
}

#[async_trait]
impl<T: PayloadTransport + ?Sized> PayloadTransport for Arc<T> {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        (**self).send(payload).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Bytes>, TransportError> {
        (**self).receive(timeout).await
    }
}

struct Shared {
    channel: Arc<dyn FrameChannel>,
    config: IsoTpConfig,
    layout: FrameLayout,
    tx_id: CanId,
    rx_id: CanId,
    /// Serializes every frame written to the channel
    write_lock: tokio::sync::Mutex<()>,
    /// Channel failure that stopped the pump
    fault: Mutex<Option<ChannelError>>,
    span: Span,
}

impl Shared {
    async fn write(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let mut frame = if self.layout.fd {
            Frame::new_fd(self.tx_id, data)?
        } else {
            Frame::new(self.tx_id, data)?
        };
        if self.layout.padding.is_some() {
            frame = frame.with_padding_flag();
        }

        let _guard = self.write_lock.lock().await;
        self.channel.send(&frame).await?;
        Ok(())
    }

    fn stopped_error(&self) -> TransportError {
        self.fault
            .lock()
            .clone()
            .map(TransportError::Channel)
            .unwrap_or(TransportError::NotStarted)
    }
}

struct Pump {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// ISO 15765-2 transport bound to one `(tx_id, rx_id)` pair
///
/// # Example
///
/// ```ignore
/// let transport = IsoTpTransport::new(channel, IsoTpConfig::default())?;
/// transport.start().await?;
/// transport.send(&[0x22, 0xF1, 0x90]).await?;
/// let response = transport.receive(Duration::from_secs(1)).await?;
/// transport.stop().await;
/// ```
pub struct IsoTpTransport {
    shared: Arc<Shared>,
    pump: Mutex<Option<Pump>>,
    /// Flow control routed from the pump; held for a whole transfer
    tx_side: tokio::sync::Mutex<Option<mpsc::Receiver<FlowControl>>>,
    rx_side: tokio::sync::Mutex<Option<mpsc::Receiver<RxItem>>>,
}

impl IsoTpTransport {
    pub fn new(channel: Arc<dyn FrameChannel>, config: IsoTpConfig) -> Result<Self, TransportError> {
        let span = tracing::info_span!(
            "isotp",
            tx_id = %format!("0x{:X}", config.address.tx_id),
            rx_id = %format!("0x{:X}", config.address.rx_id),
        );
        Self::with_span(channel, config, span)
    }

    /// Create a transport that records its events inside `span`
    pub fn with_span(
        channel: Arc<dyn FrameChannel>,
        config: IsoTpConfig,
        span: Span,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let tx_id = config.address.tx_can_id()?;
        let rx_id = config.address.rx_can_id()?;

        Ok(Self {
            shared: Arc::new(Shared {
                channel,
                layout: config.layout(),
                config,
                tx_id,
                rx_id,
                write_lock: tokio::sync::Mutex::new(()),
                fault: Mutex::new(None),
                span,
            }),
            pump: Mutex::new(None),
            tx_side: tokio::sync::Mutex::new(None),
            rx_side: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &IsoTpConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .as_ref()
            .is_some_and(|pump| !pump.task.is_finished())
    }

    /// Install the receive filter and spawn the pump; no-op if already running
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }

        let mut tx_side = self.tx_side.lock().await;
        let mut rx_side = self.rx_side.lock().await;

        let mut pump = self.pump.lock();
        if pump.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return Ok(());
        }

        self.shared
            .channel
            .set_filters(&[self.shared.config.address.rx_filter()])?;
        *self.shared.fault.lock() = None;

        let (payload_tx, payload_rx) = mpsc::channel(RX_QUEUE_DEPTH);
        let (fc_tx, fc_rx) = mpsc::channel(FC_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(
            run_pump(self.shared.clone(), payload_tx, fc_tx, shutdown_rx)
                .instrument(self.shared.span.clone()),
        );

        *tx_side = Some(fc_rx);
        *rx_side = Some(payload_rx);
        *pump = Some(Pump {
            shutdown: shutdown_tx,
            task,
        });

        self.shared.span.in_scope(|| info!("ISO-TP transport started"));
        Ok(())
    }

    /// Stop the pump, cancel an in-flight send and drop queued payloads
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        let Some(pump) = self.pump.lock().take() else {
            return;
        };

        let _ = pump.shutdown.send(true);
        if let Err(e) = pump.task.await {
            if !e.is_cancelled() {
                self.shared
                    .span
                    .in_scope(|| warn!(error = %e, "Receive pump ended abnormally"));
            }
        }

        // The in-flight send, if any, releases tx_side once it sees the signal
        *self.tx_side.lock().await = None;
        *self.rx_side.lock().await = None;

        self.shared.span.in_scope(|| info!("ISO-TP transport stopped"));
    }

    fn shutdown_signal(&self) -> Option<watch::Receiver<bool>> {
        self.pump.lock().as_ref().map(|p| p.shutdown.subscribe())
    }

    /// Transmit a payload, returning once every frame is on the channel
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.send_inner(payload)
            .instrument(self.shared.span.clone())
            .await
    }

    async fn send_inner(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut shutdown = self.shutdown_signal().ok_or(TransportError::NotStarted)?;

        let mut tx_side = self.tx_side.lock().await;
        let flow_control = tx_side.as_mut().ok_or(TransportError::NotStarted)?;

        // Flow control that arrived while no transfer was waiting is stale
        while flow_control.try_recv().is_ok() {}

        let result = tokio::select! {
            result = self.transfer(payload, flow_control) => result,
            _ = async {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            } => Err(TransportError::NotStarted),
        };

        match &result {
            Ok(()) => debug!(len = payload.len(), "Payload sent"),
            Err(e) => warn!(len = payload.len(), error = %e, "Send failed"),
        }
        result
    }

    async fn transfer(
        &self,
        payload: &[u8],
        flow_control: &mut mpsc::Receiver<FlowControl>,
    ) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut frames = Segmenter::new(payload, shared.layout)?;
        let mut remaining = frames.frame_count();

        if let Some(first) = frames.next() {
            shared.write(first).await?;
            remaining -= 1;
        }
        if remaining == 0 {
            return Ok(());
        }

        let mut fc = self.await_flow_control(flow_control).await?;
        let mut sent_in_block: u8 = 0;

        for data in frames {
            if sent_in_block > 0 {
                let gap = self.separation(&fc);
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
            }

            shared.write(data).await?;
            remaining -= 1;
            sent_in_block = sent_in_block.saturating_add(1);

            if remaining > 0 && fc.block_size > 0 && sent_in_block >= fc.block_size {
                debug!(block_size = fc.block_size, remaining, "Block complete, awaiting flow control");
                fc = self.await_flow_control(flow_control).await?;
                sent_in_block = 0;
            }
        }
        Ok(())
    }

    fn separation(&self, fc: &FlowControl) -> Duration {
        self.shared
            .config
            .flow_control
            .override_peer_st_min()
            .unwrap_or_else(|| fc.st_min.duration())
    }

    async fn await_flow_control(
        &self,
        flow_control: &mut mpsc::Receiver<FlowControl>,
    ) -> Result<FlowControl, TransportError> {
        let config = &self.shared.config.flow_control;
        let timeout = config.flow_control_timeout();
        let mut waits: u16 = 0;

        loop {
            match tokio::time::timeout(timeout, flow_control.recv()).await {
                Err(_) => return Err(ProtocolError::FlowControlTimeout(timeout).into()),
                Ok(None) => return Err(self.shared.stopped_error()),
                Ok(Some(fc)) => match fc.status {
                    FlowStatus::ContinueToSend => {
                        debug!(block_size = fc.block_size, st_min = %fc.st_min, "Flow control received");
                        return Ok(fc);
                    }
                    FlowStatus::Wait => {
                        waits += 1;
                        if waits > u16::from(config.wft_max) {
                            return Err(ProtocolError::TooManyWaits(waits).into());
                        }
                        debug!(waits, "Peer asked to wait");
                    }
                    FlowStatus::Overflow => return Err(ProtocolError::PeerOverflow.into()),
                },
            }
        }
    }

    /// Wait up to `timeout` for the next reassembled payload
    ///
    /// Returns `Ok(None)` when nothing completed in time. A reception aborted
    /// by a framing error is reported once as `TransportError::Protocol`.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<Bytes>, TransportError> {
        let deadline = Instant::now() + timeout;

        let Ok(mut rx_side) = tokio::time::timeout_at(deadline, self.rx_side.lock()).await else {
            return Ok(None);
        };
        let queue = rx_side.as_mut().ok_or(TransportError::NotStarted)?;

        match tokio::time::timeout_at(deadline, queue.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(item)) => item.map(Some),
            Ok(None) => Err(self.shared.stopped_error()),
        }
    }
}

impl Drop for IsoTpTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            let _ = pump.shutdown.send(true);
            pump.task.abort();
        }
    }
}

#[async_trait]
impl PayloadTransport for IsoTpTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        IsoTpTransport::send(self, payload).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Bytes>, TransportError> {
        IsoTpTransport::receive(self, timeout).await
    }
}

fn deliver(queue: &mpsc::Sender<RxItem>, item: RxItem) {
    if let Err(mpsc::error::TrySendError::Full(_)) = queue.try_send(item) {
        warn!("Receive queue full, dropping payload");
    }
}

async fn run_pump(
    shared: Arc<Shared>,
    payloads: mpsc::Sender<RxItem>,
    flow_control: mpsc::Sender<FlowControl>,
    mut shutdown: watch::Receiver<bool>,
) {
    let fc_config = shared.config.flow_control;
    let n_cr = fc_config.consecutive_frame_timeout();
    let mut reassembler = Reassembler::new(fc_config.block_size, shared.config.max_payload_len);
    let mut last_frame = Instant::now();

    debug!("Receive pump started");

    loop {
        let poll = if reassembler.is_idle() {
            IDLE_POLL
        } else {
            let elapsed = last_frame.elapsed();
            if elapsed >= n_cr {
                if let Some((received, total)) = reassembler.abort() {
                    warn!(received, total, "Consecutive frame timeout");
                    deliver(
                        &payloads,
                        Err(ProtocolError::ConsecutiveFrameTimeout { received, total }.into()),
                    );
                }
                continue;
            }
            n_cr - elapsed
        };

        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = shared.channel.receive(poll) => received,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Channel failed, receive pump stopping");
                *shared.fault.lock() = Some(e.clone());
                deliver(&payloads, Err(e.into()));
                break;
            }
        };

        if frame.id() != shared.rx_id {
            continue;
        }
        let Some(data) = shared.config.address.strip_rx(frame.data()) else {
            continue;
        };

        let was_receiving = !reassembler.is_idle();
        let result = reassembler.on_frame(data);

        if let Some(interrupted) = reassembler.take_interrupted() {
            warn!(error = %interrupted, "Reception replaced by a new message");
            deliver(&payloads, Err(interrupted.into()));
        }

        let reply = match result {
            Ok(RxEvent::Complete(payload)) => {
                debug!(len = payload.len(), "Payload reassembled");
                deliver(&payloads, Ok(payload));
                None
            }
            Ok(RxEvent::SendFlowControl) => {
                last_frame = Instant::now();
                Some(FlowControl::continue_to_send(
                    fc_config.block_size,
                    fc_config.st_min(),
                ))
            }
            Ok(RxEvent::Continue) => {
                last_frame = Instant::now();
                None
            }
            Ok(RxEvent::FlowControl(fc)) => {
                if flow_control.try_send(fc).is_err() {
                    debug!("Flow control dropped, no transfer waiting");
                }
                None
            }
            Ok(RxEvent::Ignored) => {
                debug!("Stray consecutive frame ignored");
                None
            }
            Err(e @ ProtocolError::Overflow { .. }) => {
                warn!(error = %e, "Rejecting oversized payload");
                deliver(&payloads, Err(e.into()));
                Some(FlowControl::overflow())
            }
            Err(e) if was_receiving => {
                warn!(error = %e, "Reception aborted");
                deliver(&payloads, Err(e.into()));
                None
            }
            Err(e) => {
                debug!(error = %e, "Malformed frame dropped");
                None
            }
        };

        if let Some(fc) = reply {
            if let Err(e) = shared.write(shared.layout.flow_control(fc)).await {
                error!(error = %e, "Failed to send flow control");
                if let TransportError::Channel(channel_error) = e {
                    *shared.fault.lock() = Some(channel_error.clone());
                    deliver(&payloads, Err(channel_error.into()));
                    break;
                }
            }
        }
    }

    debug!("Receive pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Address;
    use diagwire_core::VirtualBus;

    fn transport(bus: &VirtualBus, address: Address) -> IsoTpTransport {
        IsoTpTransport::new(Arc::new(bus.connect()), IsoTpConfig::new(address)).unwrap()
    }

    #[tokio::test]
    async fn test_not_started() {
        let bus = VirtualBus::new();
        let tp = transport(&bus, Address::default());

        assert_eq!(tp.send(&[1, 2, 3]).await, Err(TransportError::NotStarted));
        assert_eq!(
            tp.receive(Duration::from_millis(10)).await,
            Err(TransportError::NotStarted)
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let bus = VirtualBus::new();
        let result = IsoTpTransport::new(
            Arc::new(bus.connect()),
            IsoTpConfig::new(Address::normal(0x33, 0x33)),
        );
        assert!(matches!(
            result,
            Err(TransportError::Protocol(ProtocolError::InvalidConfig(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let bus = VirtualBus::new();
        let tp = transport(&bus, Address::default());

        tp.start().await.unwrap();
        tp.start().await.unwrap();
        assert!(tp.is_running());

        tp.stop().await;
        tp.stop().await;
        assert!(!tp.is_running());
        assert_eq!(tp.send(&[1]).await, Err(TransportError::NotStarted));

        // Restartable
        tp.start().await.unwrap();
        assert!(tp.is_running());
    }

    #[tokio::test]
    async fn test_single_frame_exchange() {
        let bus = VirtualBus::new();
        let tester = transport(&bus, Address::normal(0x33, 0x34));
        let ecu = transport(&bus, Address::normal(0x34, 0x33));
        tester.start().await.unwrap();
        ecu.start().await.unwrap();

        tester.send(&[0x3E, 0x00]).await.unwrap();
        let got = ecu.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&[0x3E, 0x00][..]));
    }

    #[tokio::test]
    async fn test_receive_timeout_returns_none() {
        let bus = VirtualBus::new();
        let tp = transport(&bus, Address::default());
        tp.start().await.unwrap();

        let got = tp.receive(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }
}
