//! Protocol control information (PCI)
//!
//! The first byte of every ISO-TP frame (after an optional address extension)
//! carries the frame type in its high nibble:
//!
//! | Nibble | Frame | Remaining header |
//! |--------|-------|------------------|
//! | `0x0` | Single | low nibble = length; FD escape `0x00 <len>` |
//! | `0x1` | First | 12-bit length in low nibble + next byte |
//! | `0x2` | Consecutive | low nibble = sequence number |
//! | `0x3` | Flow control | low nibble = status, then block size, stmin |

use std::fmt;
use std::time::Duration;

use diagwire_core::CLASSIC_MAX_LEN;

use crate::ProtocolError;

pub const SINGLE_FRAME: u8 = 0x00;
pub const FIRST_FRAME: u8 = 0x10;
pub const CONSECUTIVE_FRAME: u8 = 0x20;
pub const FLOW_CONTROL: u8 = 0x30;

/// Flow status carried in a flow-control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
}

impl FlowStatus {
    pub fn as_nibble(self) -> u8 {
        match self {
            Self::ContinueToSend => 0,
            Self::Wait => 1,
            Self::Overflow => 2,
        }
    }
}

impl TryFrom<u8> for FlowStatus {
    type Error = ProtocolError;

    fn try_from(nibble: u8) -> Result<Self, Self::Error> {
        match nibble {
            0 => Ok(Self::ContinueToSend),
            1 => Ok(Self::Wait),
            2 => Ok(Self::Overflow),
            other => Err(ProtocolError::InvalidFlowStatus(other)),
        }
    }
}

/// Separation time between consecutive frames, in its on-wire byte form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StMin(u8);

impl StMin {
    pub const ZERO: Self = Self(0);

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Nearest encodable value not larger than `duration`, capped at 127 ms
    pub fn from_duration(duration: Duration) -> Self {
        let micros = duration.as_micros();
        if micros >= 1000 {
            Self((micros / 1000).min(0x7F) as u8)
        } else if micros >= 100 {
            Self(0xF0 + (micros / 100) as u8)
        } else {
            Self(0)
        }
    }

    /// Reserved values are treated as the maximum (127 ms)
    pub fn duration(self) -> Duration {
        match self.0 {
            ms @ 0x00..=0x7F => Duration::from_millis(u64::from(ms)),
            us @ 0xF1..=0xF9 => Duration::from_micros(u64::from(us - 0xF0) * 100),
            _ => Duration::from_millis(127),
        }
    }
}

impl fmt::Display for StMin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.duration())
    }
}

/// Parameters announced by a flow-control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub status: FlowStatus,
    /// Consecutive frames before the next flow control (0 = unlimited)
    pub block_size: u8,
    pub st_min: StMin,
}

impl FlowControl {
    pub fn continue_to_send(block_size: u8, st_min: StMin) -> Self {
        Self {
            status: FlowStatus::ContinueToSend,
            block_size,
            st_min,
        }
    }

    pub fn overflow() -> Self {
        Self {
            status: FlowStatus::Overflow,
            block_size: 0,
            st_min: StMin::ZERO,
        }
    }
}

/// Decoded PCI header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pci {
    Single { len: usize },
    First { len: usize },
    Consecutive { seq: u8 },
    FlowControl(FlowControl),
}

impl Pci {
    /// Decode the header at the start of `data`.
    ///
    /// Returns the header and its size in bytes. Declared lengths are checked
    /// against the bytes actually present where the frame type allows it.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let Some(&first) = data.first() else {
            return Err(ProtocolError::malformed("empty", "frame carries no PCI byte"));
        };

        match first & 0xF0 {
            SINGLE_FRAME => {
                let nibble = usize::from(first & 0x0F);
                let (len, header) = if nibble == 0 && data.len() > CLASSIC_MAX_LEN {
                    let len = *data.get(1).ok_or_else(|| {
                        ProtocolError::malformed("single", "missing FD length byte")
                    })?;
                    (usize::from(len), 2)
                } else if nibble > CLASSIC_MAX_LEN - 1 {
                    return Err(ProtocolError::malformed(
                        "single",
                        format!("length nibble {} is reserved", nibble),
                    ));
                } else {
                    (nibble, 1)
                };
                if len > data.len() - header {
                    return Err(ProtocolError::malformed(
                        "single",
                        format!("declares {} bytes but carries {}", len, data.len() - header),
                    ));
                }
                Ok((Self::Single { len }, header))
            }
            FIRST_FRAME => {
                let low = *data
                    .get(1)
                    .ok_or_else(|| ProtocolError::malformed("first", "missing length byte"))?;
                let len = (usize::from(first & 0x0F) << 8) | usize::from(low);
                if len == 0 {
                    // Escape sequence for >4095 byte payloads
                    return Err(ProtocolError::malformed(
                        "first",
                        "32-bit length escape is not supported",
                    ));
                }
                Ok((Self::First { len }, 2))
            }
            CONSECUTIVE_FRAME => Ok((Self::Consecutive { seq: first & 0x0F }, 1)),
            FLOW_CONTROL => {
                if data.len() < 3 {
                    return Err(ProtocolError::malformed(
                        "flow control",
                        format!("{} bytes, need 3", data.len()),
                    ));
                }
                let status = FlowStatus::try_from(first & 0x0F)?;
                Ok((
                    Self::FlowControl(FlowControl {
                        status,
                        block_size: data[1],
                        st_min: StMin::from_byte(data[2]),
                    }),
                    3,
                ))
            }
            _ => Err(ProtocolError::UnknownPci(first)),
        }
    }

    /// Append the encoded header to `out`.
    ///
    /// `escape` selects the two-byte FD single-frame form.
    pub fn encode(&self, out: &mut Vec<u8>, escape: bool) {
        match *self {
            Self::Single { len } if escape => {
                out.push(SINGLE_FRAME);
                out.push(len as u8);
            }
            Self::Single { len } => out.push(SINGLE_FRAME | (len as u8 & 0x0F)),
            Self::First { len } => {
                out.push(FIRST_FRAME | ((len >> 8) as u8 & 0x0F));
                out.push((len & 0xFF) as u8);
            }
            Self::Consecutive { seq } => out.push(CONSECUTIVE_FRAME | (seq & 0x0F)),
            Self::FlowControl(fc) => {
                out.push(FLOW_CONTROL | fc.status.as_nibble());
                out.push(fc.block_size);
                out.push(fc.st_min.as_byte());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encoded(pci: Pci, escape: bool) -> Vec<u8> {
        let mut out = Vec::new();
        pci.encode(&mut out, escape);
        out
    }

    #[test]
    fn test_single_frame() {
        assert_eq!(encoded(Pci::Single { len: 5 }, false), vec![0x05]);
        assert_eq!(
            Pci::decode(&[0x03, 1, 2, 3, 0, 0, 0, 0]).unwrap(),
            (Pci::Single { len: 3 }, 1)
        );
        assert_eq!(Pci::decode(&[0x00]).unwrap(), (Pci::Single { len: 0 }, 1));
    }

    #[test]
    fn test_single_frame_length_exceeds_data() {
        assert!(matches!(
            Pci::decode(&[0x05, 1, 2]),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_single_frame_reserved_length_nibble() {
        for nibble in 8u8..=15 {
            let mut frame = vec![nibble];
            frame.extend(std::iter::repeat(0xAA).take(15));
            assert!(matches!(
                Pci::decode(&frame),
                Err(ProtocolError::Malformed { kind: "single", .. })
            ));
        }
        assert_eq!(
            Pci::decode(&[0x07, 1, 2, 3, 4, 5, 6, 7]).unwrap(),
            (Pci::Single { len: 7 }, 1)
        );
    }

    #[test]
    fn test_fd_single_frame_escape() {
        assert_eq!(encoded(Pci::Single { len: 20 }, true), vec![0x00, 20]);

        let mut frame = vec![0x00, 20];
        frame.extend(std::iter::repeat(0xAA).take(22));
        assert_eq!(Pci::decode(&frame).unwrap(), (Pci::Single { len: 20 }, 2));
    }

    #[test]
    fn test_first_frame() {
        assert_eq!(encoded(Pci::First { len: 14 }, false), vec![0x10, 0x0E]);
        assert_eq!(encoded(Pci::First { len: 4095 }, false), vec![0x1F, 0xFF]);
        assert_eq!(
            Pci::decode(&[0x1F, 0xFF, 0, 0, 0, 0, 0, 0]).unwrap(),
            (Pci::First { len: 4095 }, 2)
        );
        assert!(Pci::decode(&[0x10, 0x00, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_consecutive_frame() {
        assert_eq!(encoded(Pci::Consecutive { seq: 0x1F }, false), vec![0x2F]);
        assert_eq!(
            Pci::decode(&[0x21, 0xAA]).unwrap(),
            (Pci::Consecutive { seq: 1 }, 1)
        );
    }

    #[test]
    fn test_flow_control() {
        let fc = FlowControl::continue_to_send(8, StMin::from_byte(10));
        assert_eq!(encoded(Pci::FlowControl(fc), false), vec![0x30, 8, 10]);
        assert_eq!(
            Pci::decode(&[0x31, 0, 0]).unwrap().0,
            Pci::FlowControl(FlowControl {
                status: FlowStatus::Wait,
                block_size: 0,
                st_min: StMin::ZERO,
            })
        );
        assert_eq!(
            Pci::decode(&[0x35, 0, 0]),
            Err(ProtocolError::InvalidFlowStatus(5))
        );
        assert!(Pci::decode(&[0x30, 0]).is_err());
    }

    #[test]
    fn test_unknown_pci() {
        assert_eq!(Pci::decode(&[0x45, 0]), Err(ProtocolError::UnknownPci(0x45)));
    }

    #[test]
    fn test_st_min_encoding() {
        assert_eq!(StMin::from_byte(0x00).duration(), Duration::ZERO);
        assert_eq!(StMin::from_byte(0x7F).duration(), Duration::from_millis(127));
        assert_eq!(StMin::from_byte(0xF1).duration(), Duration::from_micros(100));
        assert_eq!(StMin::from_byte(0xF9).duration(), Duration::from_micros(900));
        // Reserved
        assert_eq!(StMin::from_byte(0x80).duration(), Duration::from_millis(127));
        assert_eq!(StMin::from_byte(0xFA).duration(), Duration::from_millis(127));
    }

    #[test]
    fn test_st_min_from_duration() {
        assert_eq!(StMin::from_duration(Duration::from_millis(10)).as_byte(), 10);
        assert_eq!(StMin::from_duration(Duration::from_micros(300)).as_byte(), 0xF3);
        assert_eq!(StMin::from_duration(Duration::from_secs(1)).as_byte(), 0x7F);
        assert_eq!(StMin::from_duration(Duration::from_micros(50)).as_byte(), 0);
    }
}
