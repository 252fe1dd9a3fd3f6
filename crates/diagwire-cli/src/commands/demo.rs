//! Demo command - UDS server and client on one in-process virtual bus

use std::sync::Arc;

use anyhow::{Context, Result};
use diagwire_core::VirtualBus;
use diagwire_uds::{DidValue, UdsClient, UdsServer};
use tokio::sync::watch;
use tracing::info;

use super::start_transport;
use crate::config::DiagwireConfig;

/// Read back every DID the configured server holds a value for
pub async fn demo(config: &DiagwireConfig) -> Result<()> {
    for (did, value) in run(config).await? {
        println!("0x{:04X} = {}", did, value);
    }
    Ok(())
}

async fn run(config: &DiagwireConfig) -> Result<Vec<(u16, DidValue)>> {
    let bus = VirtualBus::new();
    let tester_config = config.uds_isotp();
    let mut ecu_config = tester_config;
    ecu_config.address = ecu_config.address.reversed();

    let tester = start_transport(Arc::new(bus.connect()), tester_config, "tester").await?;
    let ecu = start_transport(Arc::new(bus.connect()), ecu_config, "ecu").await?;

    let server = UdsServer::from_config(ecu.clone(), &config.uds)
        .context("Failed to build DID table")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(async move { server.run(shutdown_rx).await });

    let client = UdsClient::new(tester.clone(), config.uds.registry()?)
        .with_p2_star(config.uds.p2_star_timeout());
    let timeout = config.uds.request_timeout();

    let mut dids: Vec<u16> = config.uds.values().into_keys().collect();
    dids.sort_unstable();
    info!(count = dids.len(), "Reading DIDs");

    let mut values = Vec::with_capacity(dids.len());
    let mut outcome = client.tester_present(false, timeout).await;
    for &did in &dids {
        if outcome.is_err() {
            break;
        }
        match client.read_data_by_identifier(did, timeout).await {
            Ok(value) => values.push((did, value)),
            Err(e) => outcome = Err(e),
        }
    }

    let _ = shutdown_tx.send(true);
    let served = server_task.await.context("Server task panicked")?;
    tester.stop().await;
    ecu.stop().await;

    outcome.context("Demo request failed")?;
    served.context("Demo server failed")?;
    Ok(values)
}
