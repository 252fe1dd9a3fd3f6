//! diagwire-uds - Unified Diagnostic Services over a payload transport
//!
//! This crate provides:
//! - A DID codec registry mapping data identifiers to encode/decode pairs
//! - [`UdsClient`] for ReadDataByIdentifier and TesterPresent requests
//! - [`UdsServer`] answering those services from a table of DID values
//!
//! Both sides talk through any [`diagwire_isotp::PayloadTransport`].

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod nrc;
pub mod registry;
pub mod server;

pub use client::UdsClient;
pub use codec::{AsciiCodec, CodecSpec, DidCodec, DidValue, RawCodec, UnsignedCodec};
pub use config::{DidEntry, UdsConfig};
pub use error::DiagnosticError;
pub use message::{negative_response, positive_response, Response};
pub use nrc::NegativeResponseCode;
pub use registry::DidRegistry;
pub use server::UdsServer;

/// Standard UDS service ID constants
pub mod service_id {
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Added to a service ID in its positive response
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}

/// Standard UDS Data Identifiers used by the default tables
pub mod standard_did {
    pub const VIN: u16 = 0xF190;
}

/// Suppress-positive-response bit of a sub-function byte
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;
