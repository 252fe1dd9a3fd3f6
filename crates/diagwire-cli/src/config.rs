//! Configuration file handling for the diagwire binary
//!
//! ```toml
//! [channel]
//! kind = "socketcan"
//! interface = "can0"
//!
//! [isotp.address]
//! tx_id = 0x33
//! rx_id = 0x34
//!
//! [isotp.flow_control]
//! block_size = 8
//! st_min_us = 0
//!
//! [retry]
//! retries = 3
//! attempt_timeout_ms = 5000
//!
//! [uds]
//! request_timeout_ms = 5000
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use diagwire_core::{FrameChannel, VirtualBus};
use diagwire_exchange::RetryPolicy;
use diagwire_isotp::IsoTpConfig;
use diagwire_uds::UdsConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Peer stmin imposed on UDS sessions unless configured otherwise
const UDS_OVERRIDE_PEER_ST_MIN_US: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// In-process bus; only useful with both ends in one process
    #[default]
    Virtual,
    Socketcan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::default(),
            interface: default_interface(),
        }
    }
}

impl ChannelConfig {
    /// Open one endpoint; virtual endpoints join `bus`
    pub fn open(&self, bus: &VirtualBus) -> Result<Arc<dyn FrameChannel>> {
        match self.kind {
            ChannelKind::Virtual => Ok(Arc::new(bus.connect())),
            ChannelKind::Socketcan => self.open_socketcan(),
        }
    }

    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    fn open_socketcan(&self) -> Result<Arc<dyn FrameChannel>> {
        let channel = diagwire_core::SocketCanChannel::open(&self.interface)
            .with_context(|| format!("Failed to open CAN interface {}", self.interface))?;
        Ok(Arc::new(channel))
    }

    #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
    fn open_socketcan(&self) -> Result<Arc<dyn FrameChannel>> {
        anyhow::bail!(
            "Cannot open {}: built without the `socketcan` feature",
            self.interface
        )
    }
}

/// Everything the binary can be configured with
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiagwireConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Transport used by `send` and `ack`
    #[serde(default)]
    pub isotp: IsoTpConfig,
    /// Transport used by UDS sessions; derived from `isotp` when absent
    #[serde(default)]
    pub uds_isotp: Option<IsoTpConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub uds: UdsConfig,
}

impl DiagwireConfig {
    /// Load from `path`; no path or a missing file means defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.isotp.validate().context("Invalid [isotp] section")?;
        self.uds_isotp().validate().context("Invalid UDS transport")?;
        self.uds.registry().context("Invalid [uds] DID table")?;
        Ok(())
    }

    /// Transport settings of a UDS session, tester side
    pub fn uds_isotp(&self) -> IsoTpConfig {
        self.uds_isotp.unwrap_or_else(|| {
            let mut config = self.isotp;
            config
                .flow_control
                .override_peer_st_min_us
                .get_or_insert(UDS_OVERRIDE_PEER_ST_MIN_US);
            config
        })
    }
}
