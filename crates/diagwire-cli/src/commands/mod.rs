//! Command implementations for the diagwire binary

pub mod demo;
pub mod isotp;
pub mod raw;
pub mod uds;

use std::sync::Arc;

use anyhow::{Context, Result};
use diagwire_isotp::{IsoTpConfig, IsoTpTransport};
use tokio::sync::watch;
use tracing::info;

pub use demo::demo;
pub use isotp::{ack, send};
pub use raw::{ack_raw, send_raw};
pub use uds::{read_did, serve};

/// Parse a hex byte string such as `0019000103010401`, `0x0019` or `00 19 00`
pub fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let digits: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    hex::decode(&digits).map_err(|e| format!("Invalid hex data {:?}: {}", s, e))
}

/// Parse a decimal or `0x`-prefixed number
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("Invalid number {:?}: {}", s, e))
}

pub fn parse_did(s: &str) -> Result<u16, String> {
    let value = parse_number(s)?;
    u16::try_from(value).map_err(|_| format!("DID out of range: 0x{:X}", value))
}

/// Watch channel that turns true on Ctrl+C
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Open and start an ISO-TP transport on `channel`
pub async fn start_transport(
    channel: Arc<dyn diagwire_core::FrameChannel>,
    config: IsoTpConfig,
    name: &'static str,
) -> Result<Arc<IsoTpTransport>> {
    let span = tracing::info_span!("isotp", side = name);
    let transport = IsoTpTransport::with_span(channel, config, span)
        .context("Invalid ISO-TP configuration")?;
    transport
        .start()
        .await
        .context("Failed to start ISO-TP transport")?;
    Ok(Arc::new(transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hex() {
        assert_eq!(
            parse_hex("0019000103010401").unwrap(),
            vec![0, 25, 0, 1, 3, 1, 4, 1]
        );
        assert_eq!(parse_hex("0x22 F1 90").unwrap(), vec![0x22, 0xF1, 0x90]);
        assert_eq!(parse_hex("de:ad").unwrap(), vec![0xDE, 0xAD]);
        assert!(parse_hex("123").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x7E0").unwrap(), 0x7E0);
        assert_eq!(parse_number("51").unwrap(), 51);
        assert_eq!(parse_did("0xF190").unwrap(), 0xF190);
        assert!(parse_did("0x10000").is_err());
        assert!(parse_number("0xGG").is_err());
    }
}
