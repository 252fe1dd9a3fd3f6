//! UDS commands - ECU-side server and tester-side DID read

use anyhow::{Context, Result};
use diagwire_core::VirtualBus;
use diagwire_uds::{UdsClient, UdsServer};
use tokio::sync::watch;
use tracing::info;

use super::start_transport;
use crate::config::DiagwireConfig;

/// Serve the configured DID table until shutdown
///
/// The server listens on the tester's transmit identifier.
pub async fn serve(
    config: &DiagwireConfig,
    bus: &VirtualBus,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut isotp = config.uds_isotp();
    isotp.address = isotp.address.reversed();
    let transport = start_transport(config.channel.open(bus)?, isotp, "ecu").await?;

    let server = UdsServer::from_config(transport.clone(), &config.uds)
        .context("Failed to build DID table")?
        .with_span(tracing::info_span!("uds_server"));
    info!(dids = config.uds.dids.len(), "UDS server ready");

    let result = server.run(shutdown).await;
    transport.stop().await;
    result.context("UDS server failed")
}

/// Read one DID and print its value
pub async fn read_did(config: &DiagwireConfig, bus: &VirtualBus, did: u16) -> Result<()> {
    let transport = start_transport(config.channel.open(bus)?, config.uds_isotp(), "tester").await?;
    let client = UdsClient::new(transport.clone(), config.uds.registry()?)
        .with_p2_star(config.uds.p2_star_timeout());

    let result = client
        .read_data_by_identifier(did, config.uds.request_timeout())
        .await;
    transport.stop().await;

    let value = result.with_context(|| format!("Failed to read DID 0x{:04X}", did))?;
    println!("0x{:04X} = {}", did, value);
    Ok(())
}
