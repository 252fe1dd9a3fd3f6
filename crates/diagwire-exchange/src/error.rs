//! Exchange error types

use std::fmt;
use std::time::Duration;

use diagwire_core::ChannelError;
use diagwire_isotp::{ProtocolError, TransportError};
use thiserror::Error;

/// Failure reported by an [`ExchangeLink`](crate::ExchangeLink)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    /// Costs the current attempt only
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Ends the exchange
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Link not started")]
    NotStarted,
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(e) => Self::Protocol(e),
            TransportError::Channel(e) => Self::Channel(e),
            TransportError::NotStarted => Self::NotStarted,
        }
    }
}

/// Why the last attempt of an exchange did not succeed
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// Budget was zero
    NotAttempted,
    /// Nothing matching arrived within the attempt timeout
    NoAcknowledgment(Duration),
    Protocol(ProtocolError),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAttempted => write!(f, "no attempt made"),
            Self::NoAcknowledgment(timeout) => {
                write!(f, "no acknowledgment within {:?}", timeout)
            }
            Self::Protocol(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Transmission failed after {attempts} attempt(s): {last_failure}")]
    TransmissionFailed {
        attempts: u32,
        last_failure: AttemptFailure,
    },

    #[error("Channel failed on attempt {attempt}: {source}")]
    Channel {
        attempt: u32,
        #[source]
        source: ChannelError,
    },

    #[error("Link not started")]
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transport_error_classification() {
        let protocol: LinkError =
            TransportError::Protocol(ProtocolError::PeerOverflow).into();
        assert_eq!(protocol, LinkError::Protocol(ProtocolError::PeerOverflow));

        let channel: LinkError =
            TransportError::Channel(ChannelError::Transient("bus off".into())).into();
        assert!(matches!(channel, LinkError::Channel(_)));

        assert_eq!(LinkError::from(TransportError::NotStarted), LinkError::NotStarted);
    }

    #[test]
    fn test_display() {
        let err = ExchangeError::TransmissionFailed {
            attempts: 3,
            last_failure: AttemptFailure::NoAcknowledgment(Duration::from_millis(500)),
        };
        assert_eq!(
            err.to_string(),
            "Transmission failed after 3 attempt(s): no acknowledgment within 500ms"
        );
    }
}
