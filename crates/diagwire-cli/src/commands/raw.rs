//! Raw-frame commands - one CAN frame per message, no transport protocol

use std::time::Duration;

use anyhow::{Context, Result};
use diagwire_core::{CanId, Frame, FrameChannel, HardwareFilter, VirtualBus};
use diagwire_exchange::{from_id, RawLink, ReliableExchange};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DiagwireConfig;

/// Payload of the raw acknowledgment frame
pub const RAW_ACK: [u8; 1] = [0x01];

/// How long `ack-raw` waits for a frame before logging that it is idle
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

fn can_id(config: &DiagwireConfig, id: Option<u32>) -> Result<CanId> {
    let address = &config.isotp.address;
    CanId::new(id.unwrap_or(address.tx_id), address.extended_id).context("Invalid CAN ID")
}

/// Send one frame and wait for a frame on the same identifier to acknowledge it
pub async fn send_raw(
    config: &DiagwireConfig,
    bus: &VirtualBus,
    id: Option<u32>,
    data: &[u8],
) -> Result<()> {
    let id = can_id(config, id)?;
    let link = RawLink::new(config.channel.open(bus)?, id)
        .listen_to(id)
        .context("Failed to install receive filter")?;
    let frame = link.frame(data).context("Payload does not fit one frame")?;

    let exchange = ReliableExchange::new(link, config.retry.clone())
        .with_span(tracing::info_span!("send_raw", %id));
    let acked = exchange.send(&frame, &from_id(id)).await?;

    println!(
        "Acknowledged after {} attempt(s): {}",
        acked.attempts, acked.ack
    );
    Ok(())
}

/// Acknowledge every frame on `id` with [`RAW_ACK`] until shutdown
pub async fn ack_raw(
    config: &DiagwireConfig,
    bus: &VirtualBus,
    id: Option<u32>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let id = can_id(config, id)?;
    let channel = config.channel.open(bus)?;
    let filter = match id {
        CanId::Standard(raw) => HardwareFilter::exact_standard(raw),
        CanId::Extended(raw) => HardwareFilter::exact_extended(raw),
    };
    channel.set_filters(&[filter])?;
    info!(%id, "Waiting for frames");

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = channel.receive(IDLE_TIMEOUT) => received?,
        };

        let Some(frame) = received else {
            info!("No frame received");
            continue;
        };
        info!(frame = %frame, "Frame received");

        let ack = Frame::new(frame.id(), RAW_ACK.to_vec())?;
        match channel.send(&ack).await {
            Ok(()) => info!(id = %frame.id(), "Acknowledgment sent"),
            Err(e) => warn!(error = %e, "Failed to send acknowledgment"),
        }
    }
    Ok(())
}
