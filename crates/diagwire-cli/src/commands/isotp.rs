//! ISO-TP commands - reliable payload send and the matching responder

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use diagwire_core::VirtualBus;
use diagwire_exchange::{any_message, PayloadLink, ReliableExchange};
use diagwire_isotp::TransportError;
use tokio::sync::watch;
use tracing::{error, info};

use super::start_transport;
use crate::config::DiagwireConfig;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Send one payload and wait for any payload in reply
pub async fn send(config: &DiagwireConfig, bus: &VirtualBus, data: &[u8]) -> Result<()> {
    let transport = start_transport(config.channel.open(bus)?, config.isotp, "sender").await?;

    let exchange = ReliableExchange::new(PayloadLink::new(transport.clone()), config.retry.clone())
        .with_span(tracing::info_span!("send"));
    let result = exchange.send(&Bytes::copy_from_slice(data), &any_message()).await;
    transport.stop().await;

    let acked = result?;
    println!(
        "Acknowledged after {} attempt(s): {}",
        acked.attempts,
        hex::encode_upper(&acked.ack)
    );
    Ok(())
}

/// Answer every received payload with `reply` until shutdown
///
/// Runs on the reversed address of the `[isotp]` section.
pub async fn ack(
    config: &DiagwireConfig,
    bus: &VirtualBus,
    reply: &[u8],
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut isotp = config.isotp;
    isotp.address = isotp.address.reversed();
    let transport = start_transport(config.channel.open(bus)?, isotp, "responder").await?;
    info!("Waiting for ISO-TP payloads");

    let outcome = loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            received = transport.receive(IDLE_TIMEOUT) => received,
        };

        match received {
            Ok(Some(payload)) => {
                info!(data = %hex::encode_upper(&payload), "Payload received");
                match transport.send(reply).await {
                    Ok(()) => info!("Acknowledgment sent"),
                    Err(e) => error!(error = %e, "Failed to send acknowledgment"),
                }
            }
            Ok(None) => info!("No payload received"),
            Err(TransportError::Protocol(e)) => {
                error!(error = %e, "Protocol error while receiving");
            }
            Err(e) => break Err(e),
        }
    };

    transport.stop().await;
    outcome?;
    Ok(())
}
