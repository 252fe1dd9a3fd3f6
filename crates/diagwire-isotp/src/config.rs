//! ISO-TP configuration
//!
//! Every field has a default so a partial TOML table is enough:
//!
//! ```toml
//! [isotp.address]
//! mode = "normal"
//! tx_id = 0x33
//! rx_id = 0x34
//!
//! [isotp.flow_control]
//! block_size = 8
//! st_min_us = 0
//! tx_padding = 0x00   # or `false` to send frames unpadded
//! ```

use std::time::Duration;

use diagwire_core::{fd_length_for, CanId, HardwareFilter, CLASSIC_MAX_LEN, FD_MAX_LEN};
use serde::{Deserialize, Serialize};

use crate::pci::StMin;
use crate::segment::FrameLayout;
use crate::{ProtocolError, MAX_PAYLOAD_LEN};

/// How the ISO-TP header is placed in a CAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    /// PCI in the first data byte
    #[default]
    Normal,
    /// First data byte is the target address
    Extended,
    /// First data byte is the address extension
    Mixed,
}

impl AddressingMode {
    pub fn uses_extension_byte(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Transmit/receive addressing of one ISO-TP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub mode: AddressingMode,
    /// CAN ID this side transmits on
    #[serde(default = "default_tx_id")]
    pub tx_id: u32,
    /// CAN ID this side listens on
    #[serde(default = "default_rx_id")]
    pub rx_id: u32,
    /// Use 29-bit identifiers
    #[serde(default)]
    pub extended_id: bool,
    /// Extension byte prepended to transmitted frames (extended/mixed)
    #[serde(default)]
    pub tx_extension: u8,
    /// Extension byte expected on received frames (extended/mixed)
    #[serde(default)]
    pub rx_extension: u8,
}

fn default_tx_id() -> u32 {
    0x33
}

fn default_rx_id() -> u32 {
    0x34
}

impl Default for Address {
    fn default() -> Self {
        Self::normal(default_tx_id(), default_rx_id())
    }
}

impl Address {
    /// Normal addressing with 11-bit identifiers
    pub fn normal(tx_id: u32, rx_id: u32) -> Self {
        Self {
            mode: AddressingMode::Normal,
            tx_id,
            rx_id,
            extended_id: false,
            tx_extension: 0,
            rx_extension: 0,
        }
    }

    pub fn with_extension(mut self, mode: AddressingMode, tx: u8, rx: u8) -> Self {
        self.mode = mode;
        self.tx_extension = tx;
        self.rx_extension = rx;
        self
    }

    /// The same session seen from the other end of the link
    pub fn reversed(&self) -> Self {
        Self {
            tx_id: self.rx_id,
            rx_id: self.tx_id,
            tx_extension: self.rx_extension,
            rx_extension: self.tx_extension,
            ..*self
        }
    }

    pub fn tx_can_id(&self) -> Result<CanId, ProtocolError> {
        CanId::new(self.tx_id, self.extended_id)
            .map_err(|e| ProtocolError::InvalidConfig(format!("tx_id: {}", e)))
    }

    pub fn rx_can_id(&self) -> Result<CanId, ProtocolError> {
        CanId::new(self.rx_id, self.extended_id)
            .map_err(|e| ProtocolError::InvalidConfig(format!("rx_id: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.tx_can_id()?;
        self.rx_can_id()?;
        if self.tx_id == self.rx_id {
            return Err(ProtocolError::InvalidConfig(format!(
                "tx_id and rx_id must differ (both 0x{:X})",
                self.tx_id
            )));
        }
        Ok(())
    }

    /// Acceptance filter for the receive identifier
    pub fn rx_filter(&self) -> HardwareFilter {
        if self.extended_id {
            HardwareFilter::exact_extended(self.rx_id)
        } else {
            HardwareFilter::new(self.rx_id, 0x7FF, false)
        }
    }

    /// Strip the receive extension byte, or `None` if the frame is not for us
    pub fn strip_rx<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        if !self.mode.uses_extension_byte() {
            return Some(data);
        }
        match data.split_first() {
            Some((&ext, rest)) if ext == self.rx_extension => Some(rest),
            _ => None,
        }
    }
}

/// Flow-control behaviour in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControlConfig {
    /// Separation time we advertise to the peer (microseconds)
    #[serde(default)]
    pub st_min_us: u32,
    /// Block size we advertise to the peer (0 = unlimited)
    #[serde(default = "default_block_size")]
    pub block_size: u8,
    /// Pad transmitted frames to full length with this byte
    #[serde(default = "default_tx_padding", with = "padding")]
    pub tx_padding: Option<u8>,
    /// N_Bs: wait for flow control after a first frame or block
    #[serde(default = "default_timeout_ms")]
    pub flow_control_timeout_ms: u64,
    /// N_Cr: wait for the next consecutive frame
    #[serde(default = "default_timeout_ms")]
    pub consecutive_frame_timeout_ms: u64,
    /// WAIT flow-control frames accepted per transfer
    #[serde(default)]
    pub wft_max: u8,
    /// Ignore the peer's stmin and use this separation instead (microseconds)
    #[serde(default)]
    pub override_peer_st_min_us: Option<u32>,
}

fn default_block_size() -> u8 {
    8
}

fn default_tx_padding() -> Option<u8> {
    Some(0x00)
}

/// `tx_padding` in TOML: a fill byte, `true` for 0x00, or `false` for none
mod padding {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Padding {
        Byte(u8),
        Enabled(bool),
    }

    pub fn serialize<S: Serializer>(value: &Option<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(byte) => Padding::Byte(*byte),
            None => Padding::Enabled(false),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
        Ok(match Padding::deserialize(deserializer)? {
            Padding::Byte(byte) => Some(byte),
            Padding::Enabled(true) => Some(0x00),
            Padding::Enabled(false) => None,
        })
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            st_min_us: 0,
            block_size: default_block_size(),
            tx_padding: default_tx_padding(),
            flow_control_timeout_ms: default_timeout_ms(),
            consecutive_frame_timeout_ms: default_timeout_ms(),
            wft_max: 0,
            override_peer_st_min_us: None,
        }
    }
}

impl FlowControlConfig {
    pub fn st_min(&self) -> StMin {
        StMin::from_duration(Duration::from_micros(u64::from(self.st_min_us)))
    }

    pub fn flow_control_timeout(&self) -> Duration {
        Duration::from_millis(self.flow_control_timeout_ms)
    }

    pub fn consecutive_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.consecutive_frame_timeout_ms)
    }

    pub fn override_peer_st_min(&self) -> Option<Duration> {
        self.override_peer_st_min_us
            .map(|us| Duration::from_micros(u64::from(us)))
    }
}

/// Complete configuration of one [`crate::IsoTpTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoTpConfig {
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
    /// Transmit CAN FD frames
    #[serde(default)]
    pub fd: bool,
    /// Data length of transmitted frames (8 for classic CAN)
    #[serde(default = "default_tx_data_length")]
    pub tx_data_length: usize,
    /// Largest payload accepted on receive
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
}

fn default_tx_data_length() -> usize {
    CLASSIC_MAX_LEN
}

fn default_max_payload_len() -> usize {
    MAX_PAYLOAD_LEN
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self::new(Address::default())
    }
}

impl IsoTpConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            flow_control: FlowControlConfig::default(),
            fd: false,
            tx_data_length: default_tx_data_length(),
            max_payload_len: default_max_payload_len(),
        }
    }

    pub fn with_flow_control(mut self, flow_control: FlowControlConfig) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.address.validate()?;

        if self.fd {
            if self.tx_data_length < CLASSIC_MAX_LEN
                || self.tx_data_length > FD_MAX_LEN
                || fd_length_for(self.tx_data_length) != Some(self.tx_data_length)
            {
                return Err(ProtocolError::InvalidConfig(format!(
                    "tx_data_length {} is not a valid CAN FD length",
                    self.tx_data_length
                )));
            }
        } else if self.tx_data_length != CLASSIC_MAX_LEN {
            return Err(ProtocolError::InvalidConfig(format!(
                "tx_data_length must be 8 for classic CAN, got {}",
                self.tx_data_length
            )));
        }

        if self.max_payload_len == 0 || self.max_payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidConfig(format!(
                "max_payload_len must be within 1..={}",
                MAX_PAYLOAD_LEN
            )));
        }
        Ok(())
    }

    /// Frame layout used for transmitted frames
    pub fn layout(&self) -> FrameLayout {
        FrameLayout {
            frame_len: self.tx_data_length,
            fd: self.fd,
            address_extension: self
                .address
                .mode
                .uses_extension_byte()
                .then_some(self.address.tx_extension),
            padding: self.flow_control.tx_padding,
        }
    }
}
