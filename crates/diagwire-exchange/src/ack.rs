//! Acknowledgment predicates

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use diagwire_core::{CanId, Frame};

/// Offset of a positive UDS response over its request service
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
/// Positive response to ReadDataByIdentifier
const READ_DATA_BY_ID_RESPONSE: u8 = 0x62;

/// Decides which inbound message acknowledges a transmission
pub struct AckPredicate<M> {
    description: String,
    test: Arc<dyn Fn(&M) -> bool + Send + Sync>,
}

impl<M> AckPredicate<M> {
    pub fn new(
        description: impl Into<String>,
        test: impl Fn(&M) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    pub fn matches(&self, message: &M) -> bool {
        (self.test)(message)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<M> Clone for AckPredicate<M> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            test: self.test.clone(),
        }
    }
}

impl<M> fmt::Debug for AckPredicate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AckPredicate").field(&self.description).finish()
    }
}

/// Whatever arrives first
pub fn any_message<M>() -> AckPredicate<M> {
    AckPredicate::new("any message", |_| true)
}

/// A frame sent with identifier `id`
pub fn from_id(id: CanId) -> AckPredicate<Frame> {
    AckPredicate::new(format!("frame from {}", id), move |frame: &Frame| {
        frame.id() == id
    })
}

/// A payload starting with `prefix`
pub fn payload_prefix(prefix: impl Into<Bytes>) -> AckPredicate<Bytes> {
    let prefix = prefix.into();
    AckPredicate::new(
        format!("payload starting {:02X?}", prefix.as_ref()),
        move |payload: &Bytes| payload.starts_with(&prefix),
    )
}

/// The positive UDS response to `service`
pub fn positive_response_to(service: u8) -> AckPredicate<Bytes> {
    let expected = service.wrapping_add(POSITIVE_RESPONSE_OFFSET);
    AckPredicate::new(
        format!("positive response to 0x{:02X}", service),
        move |payload: &Bytes| payload.first() == Some(&expected),
    )
}

/// A ReadDataByIdentifier response carrying `did`
pub fn did_match(did: u16) -> AckPredicate<Bytes> {
    let [hi, lo] = did.to_be_bytes();
    AckPredicate::new(format!("DID 0x{:04X}", did), move |payload: &Bytes| {
        payload.starts_with(&[READ_DATA_BY_ID_RESPONSE, hi, lo])
    })
}
