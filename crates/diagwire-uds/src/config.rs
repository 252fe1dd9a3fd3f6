//! UDS layer configuration
//!
//! ```toml
//! request_timeout_ms = 5000
//! default_codec = { kind = "unsigned", width = 2 }
//!
//! [[dids]]
//! did = 0xF190
//! codec = { kind = "ascii", len = 15 }
//! value = "ABCDE0123456789"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecSpec, DidValue};
use crate::{standard_did, DiagnosticError, DidRegistry};

/// One row of the DID table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidEntry {
    pub did: u16,
    pub codec: CodecSpec,
    /// Value served by the server; clients ignore it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<DidValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdsConfig {
    /// P2: how long a client waits for a response
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// P2*: extended wait after a response-pending (0x78) answer
    #[serde(default = "default_p2_star_timeout_ms")]
    pub p2_star_timeout_ms: u64,
    /// Codec for identifiers without an entry
    #[serde(default = "default_codec")]
    pub default_codec: Option<CodecSpec>,
    #[serde(default = "default_dids")]
    pub dids: Vec<DidEntry>,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_p2_star_timeout_ms() -> u64 {
    5000
}

fn default_codec() -> Option<CodecSpec> {
    Some(CodecSpec::Unsigned { width: 2 })
}

fn default_dids() -> Vec<DidEntry> {
    vec![DidEntry {
        did: standard_did::VIN,
        codec: CodecSpec::Ascii { len: 15 },
        value: Some(DidValue::Text("ABCDE0123456789".to_string())),
    }]
}

impl Default for UdsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            p2_star_timeout_ms: default_p2_star_timeout_ms(),
            default_codec: default_codec(),
            dids: default_dids(),
        }
    }
}

impl UdsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn p2_star_timeout(&self) -> Duration {
        Duration::from_millis(self.p2_star_timeout_ms)
    }

    /// Build the codec registry described by the table
    pub fn registry(&self) -> Result<DidRegistry, DiagnosticError> {
        let mut registry = DidRegistry::new();
        if let Some(codec) = &self.default_codec {
            registry = registry.with_default(codec.build()?);
        }
        for entry in &self.dids {
            registry.register(entry.did, entry.codec.build()?)?;
        }
        Ok(registry)
    }

    /// Values the server answers with
    pub fn values(&self) -> HashMap<u16, DidValue> {
        self.dids
            .iter()
            .filter_map(|entry| entry.value.clone().map(|value| (entry.did, value)))
            .collect()
    }
}
