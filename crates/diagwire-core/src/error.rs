//! Frame channel errors

use thiserror::Error;

/// Failure of the link-layer channel.
///
/// Channel errors are fatal to the session using the channel: upper layers
/// surface them to the caller and never retry on them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Transient I/O fault: {0}")]
    Transient(String),
}

impl ChannelError {
    /// Map an OS-level I/O error onto the channel taxonomy
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::NotConnected => {
                Self::HardwareUnavailable(format!("{}: {}", context, err))
            }
            ErrorKind::InvalidInput => Self::InvalidParameter(format!("{}: {}", context, err)),
            _ => Self::Transient(format!("{}: {}", context, err)),
        }
    }
}
