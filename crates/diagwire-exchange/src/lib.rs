//! diagwire-exchange - Reliable message exchange
//!
//! Sends a message and waits for an acknowledgment, retrying a bounded number
//! of times. The same controller drives raw CAN frames ([`RawLink`]) and
//! ISO-TP payloads ([`PayloadLink`]); what counts as an acknowledgment is
//! decided by an [`AckPredicate`].
//!
//! ```ignore
//! let link = PayloadLink::new(transport);
//! let exchange = ReliableExchange::new(link, RetryPolicy::default());
//! let ack = exchange.send(&Bytes::from_static(&[0x22, 0xF1, 0x90]), &did_match(0xF190)).await?;
//! ```

pub mod ack;
pub mod config;
pub mod controller;
pub mod error;
pub mod link;

pub use ack::{any_message, did_match, from_id, payload_prefix, positive_response_to, AckPredicate};
pub use config::RetryPolicy;
pub use controller::{Acknowledged, ReliableExchange};
pub use error::{AttemptFailure, ExchangeError, LinkError};
pub use link::{ExchangeLink, PayloadLink, RawLink};
