//! DID codec registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{DidCodec, DidValue};
use crate::DiagnosticError;

/// Mapping from data identifier to codec
///
/// Each identifier has at most one codec. Identifiers without one fall back to
/// the default codec when set, and are rejected otherwise.
#[derive(Debug, Clone, Default)]
pub struct DidRegistry {
    codecs: HashMap<u16, Arc<dyn DidCodec>>,
    default: Option<Arc<dyn DidCodec>>,
}

impl DidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, codec: Arc<dyn DidCodec>) -> Self {
        self.default = Some(codec);
        self
    }

    pub fn register(&mut self, did: u16, codec: Arc<dyn DidCodec>) -> Result<(), DiagnosticError> {
        if self.codecs.contains_key(&did) {
            return Err(DiagnosticError::DuplicateIdentifier(did));
        }
        self.codecs.insert(did, codec);
        Ok(())
    }

    /// Whether `did` has its own codec (the default does not count)
    pub fn is_registered(&self, did: u16) -> bool {
        self.codecs.contains_key(&did)
    }

    pub fn resolve(&self, did: u16) -> Result<&Arc<dyn DidCodec>, DiagnosticError> {
        self.codecs
            .get(&did)
            .or(self.default.as_ref())
            .ok_or(DiagnosticError::UnsupportedIdentifier(did))
    }

    pub fn encode(&self, did: u16, value: &DidValue) -> Result<Vec<u8>, DiagnosticError> {
        let codec = self.resolve(did)?;
        let encoded = codec.encode(value)?;
        if let Some(expected) = codec.encoded_len() {
            if encoded.len() != expected {
                return Err(DiagnosticError::CodecLengthMismatch {
                    did,
                    expected,
                    actual: encoded.len(),
                });
            }
        }
        Ok(encoded)
    }

    pub fn decode(&self, did: u16, data: &[u8]) -> Result<DidValue, DiagnosticError> {
        let codec = self.resolve(did)?;
        if let Some(expected) = codec.encoded_len() {
            if data.len() != expected {
                return Err(DiagnosticError::CodecLengthMismatch {
                    did,
                    expected,
                    actual: data.len(),
                });
            }
        }
        codec.decode(data)
    }

    /// Decode the records of a ReadDataByIdentifier response
    ///
    /// `records` is the response without its service byte: `DID value DID value ...`,
    /// in the order the identifiers were requested.
    pub fn decode_records(
        &self,
        requested: &[u16],
        records: &[u8],
    ) -> Result<Vec<(u16, DidValue)>, DiagnosticError> {
        let mut values = Vec::with_capacity(requested.len());
        let mut rest = records;

        for (index, &did) in requested.iter().enumerate() {
            let [hi, lo, tail @ ..] = rest else {
                return Err(DiagnosticError::InvalidResponse(format!(
                    "Response ends before DID 0x{:04X}",
                    did
                )));
            };
            let got = u16::from_be_bytes([*hi, *lo]);
            if got != did {
                return Err(DiagnosticError::InvalidResponse(format!(
                    "Expected DID 0x{:04X}, got 0x{:04X}",
                    did, got
                )));
            }

            let data = if index + 1 == requested.len() {
                tail
            } else {
                let len = self.resolve(did)?.encoded_len().ok_or_else(|| {
                    DiagnosticError::InvalidResponse(format!(
                        "DID 0x{:04X} has no fixed length and is not last",
                        did
                    ))
                })?;
                tail.get(..len)
                    .ok_or(DiagnosticError::CodecLengthMismatch {
                        did,
                        expected: len,
                        actual: tail.len(),
                    })?
            };
            values.push((did, self.decode(did, data)?));
            rest = &tail[data.len()..];
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AsciiCodec, UnsignedCodec};
    use pretty_assertions::assert_eq;

    fn registry() -> DidRegistry {
        let mut registry = DidRegistry::new().with_default(Arc::new(UnsignedCodec::u16()));
        registry.register(0xF190, Arc::new(AsciiCodec::new(15))).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = registry();
        assert_eq!(
            registry.register(0xF190, Arc::new(AsciiCodec::new(17))),
            Err(DiagnosticError::DuplicateIdentifier(0xF190))
        );
    }

    #[test]
    fn test_default_codec() {
        let registry = registry();
        assert!(!registry.is_registered(0x1234));
        assert_eq!(
            registry.decode(0x1234, &[0x00, 0x2A]).unwrap(),
            DidValue::Unsigned(42)
        );
    }

    #[test]
    fn test_unsupported_without_default() {
        let registry = DidRegistry::new();
        assert_eq!(
            registry.encode(0xF190, &"x".into()),
            Err(DiagnosticError::UnsupportedIdentifier(0xF190))
        );
    }

    #[test]
    fn test_length_mismatch() {
        let registry = registry();
        assert_eq!(
            registry.decode(0xF190, b"ABC"),
            Err(DiagnosticError::CodecLengthMismatch {
                did: 0xF190,
                expected: 15,
                actual: 3
            })
        );
    }

    #[test]
    fn test_decode_records() {
        let registry = registry();
        let mut records = vec![0xF1, 0x90];
        records.extend_from_slice(b"ABCDE0123456789");
        records.extend_from_slice(&[0x01, 0x00, 0x12, 0x34]);

        let values = registry.decode_records(&[0xF190, 0x0100], &records).unwrap();
        assert_eq!(
            values,
            vec![
                (0xF190, DidValue::Text("ABCDE0123456789".to_string())),
                (0x0100, DidValue::Unsigned(0x1234)),
            ]
        );
    }

    #[test]
    fn test_decode_records_trailing_bytes() {
        let registry = registry();
        let records = [0x01, 0x00, 0x12, 0x34, 0x56];
        assert!(matches!(
            registry.decode_records(&[0x0100], &records),
            Err(DiagnosticError::CodecLengthMismatch { actual: 3, .. })
        ));
    }
}
