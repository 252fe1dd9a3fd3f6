//! UDS request/response framing

use crate::service_id::{NEGATIVE_RESPONSE, POSITIVE_RESPONSE_OFFSET};
use crate::{DiagnosticError, NegativeResponseCode};

/// Create a positive response
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id.wrapping_add(POSITIVE_RESPONSE_OFFSET));
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE, service_id, nrc.into()]
}

/// A classified response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<'a> {
    Positive {
        /// Service the response answers (response byte - 0x40)
        service: u8,
        data: &'a [u8],
    },
    Negative {
        service: u8,
        code: NegativeResponseCode,
    },
}

impl<'a> Response<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, DiagnosticError> {
        match payload {
            [] => Err(DiagnosticError::InvalidResponse("Empty response".to_string())),
            [NEGATIVE_RESPONSE, service, code, ..] => Ok(Self::Negative {
                service: *service,
                code: NegativeResponseCode::from(*code),
            }),
            [NEGATIVE_RESPONSE, ..] => Err(DiagnosticError::InvalidResponse(
                "Negative response too short".to_string(),
            )),
            [sid, data @ ..] if *sid >= POSITIVE_RESPONSE_OFFSET => Ok(Self::Positive {
                service: sid - POSITIVE_RESPONSE_OFFSET,
                data,
            }),
            [sid, ..] => Err(DiagnosticError::InvalidResponse(format!(
                "Not a response: 0x{:02X}",
                sid
            ))),
        }
    }

    pub fn service(&self) -> u8 {
        match self {
            Self::Positive { service, .. } | Self::Negative { service, .. } => *service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positive_response() {
        assert_eq!(positive_response(0x22, &[0xF1, 0x90]), vec![0x62, 0xF1, 0x90]);
        assert_eq!(
            Response::parse(&[0x62, 0xF1, 0x90, 0x41]).unwrap(),
            Response::Positive {
                service: 0x22,
                data: &[0xF1, 0x90, 0x41],
            }
        );
    }

    #[test]
    fn test_negative_response() {
        let payload = negative_response(0x22, NegativeResponseCode::RequestOutOfRange);
        assert_eq!(payload, vec![0x7F, 0x22, 0x31]);
        assert_eq!(
            Response::parse(&payload).unwrap(),
            Response::Negative {
                service: 0x22,
                code: NegativeResponseCode::RequestOutOfRange,
            }
        );
    }

    #[test]
    fn test_malformed() {
        assert!(Response::parse(&[]).is_err());
        assert!(Response::parse(&[0x7F, 0x22]).is_err());
        // A request, not a response
        assert!(Response::parse(&[0x22, 0xF1, 0x90]).is_err());
    }
}
