//! UDS server (ECU side)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use diagwire_isotp::{PayloadTransport, TransportError};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::codec::DidValue;
use crate::message::{negative_response, positive_response};
use crate::service_id::{READ_DATA_BY_ID, TESTER_PRESENT};
use crate::{
    DiagnosticError, DidRegistry, NegativeResponseCode, UdsConfig, SUPPRESS_POSITIVE_RESPONSE,
};

/// How often `run` re-checks the shutdown signal while idle
const SERVE_POLL: Duration = Duration::from_millis(100);

/// Diagnostic server answering from a table of encoded DID values
pub struct UdsServer {
    transport: Arc<dyn PayloadTransport>,
    registry: DidRegistry,
    values: RwLock<HashMap<u16, Vec<u8>>>,
    span: Span,
}

impl UdsServer {
    pub fn new(transport: Arc<dyn PayloadTransport>, registry: DidRegistry) -> Self {
        Self {
            transport,
            registry,
            values: RwLock::new(HashMap::new()),
            span: tracing::info_span!("uds_server"),
        }
    }

    /// Server with the codec table and values of `config`
    pub fn from_config(
        transport: Arc<dyn PayloadTransport>,
        config: &UdsConfig,
    ) -> Result<Self, DiagnosticError> {
        let server = Self::new(transport, config.registry()?);
        for (did, value) in config.values() {
            server.set_value(did, &value)?;
        }
        Ok(server)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Store the value served for `did`, encoded with its codec
    pub fn set_value(&self, did: u16, value: &DidValue) -> Result<(), DiagnosticError> {
        let encoded = self.registry.encode(did, value)?;
        self.values.write().insert(did, encoded);
        Ok(())
    }

    /// Build the response to one request; `None` means stay silent
    pub fn handle_request(&self, request: &[u8]) -> Option<Vec<u8>> {
        let Some(&sid) = request.first() else {
            return Some(negative_response(
                0x00,
                NegativeResponseCode::IncorrectMessageLengthOrFormat,
            ));
        };

        match sid {
            READ_DATA_BY_ID => Some(self.handle_read_data_by_id(request)),
            TESTER_PRESENT => self.handle_tester_present(request),
            _ => {
                debug!(service_id = sid, "Unsupported service");
                Some(negative_response(sid, NegativeResponseCode::ServiceNotSupported))
            }
        }
    }

    fn handle_read_data_by_id(&self, request: &[u8]) -> Vec<u8> {
        let dids = &request[1..];
        if dids.is_empty() || dids.len() % 2 != 0 {
            return negative_response(
                READ_DATA_BY_ID,
                NegativeResponseCode::IncorrectMessageLengthOrFormat,
            );
        }

        let values = self.values.read();
        let mut response_data = Vec::new();

        for chunk in dids.chunks_exact(2) {
            let did = u16::from_be_bytes([chunk[0], chunk[1]]);
            let Some(value) = values.get(&did) else {
                debug!(did = format!("0x{:04X}", did), "DID not supported");
                return negative_response(READ_DATA_BY_ID, NegativeResponseCode::RequestOutOfRange);
            };
            debug!(did = format!("0x{:04X}", did), len = value.len(), "Reading DID");
            response_data.extend_from_slice(chunk);
            response_data.extend_from_slice(value);
        }

        positive_response(READ_DATA_BY_ID, &response_data)
    }

    fn handle_tester_present(&self, request: &[u8]) -> Option<Vec<u8>> {
        let [_, sub_function] = request else {
            return Some(negative_response(
                TESTER_PRESENT,
                NegativeResponseCode::IncorrectMessageLengthOrFormat,
            ));
        };

        if sub_function & !SUPPRESS_POSITIVE_RESPONSE != 0 {
            return Some(negative_response(
                TESTER_PRESENT,
                NegativeResponseCode::SubFunctionNotSupported,
            ));
        }
        if sub_function & SUPPRESS_POSITIVE_RESPONSE != 0 {
            debug!("Tester present, response suppressed");
            return None;
        }
        Some(positive_response(TESTER_PRESENT, &[*sub_function]))
    }

    /// Wait up to `timeout` for one request and answer it
    ///
    /// Returns `Ok(false)` when no request arrived.
    pub async fn serve(&self, timeout: Duration) -> Result<bool, DiagnosticError> {
        self.serve_one(timeout).instrument(self.span.clone()).await
    }

    async fn serve_one(&self, timeout: Duration) -> Result<bool, DiagnosticError> {
        let Some(request) = self.transport.receive(timeout).await? else {
            return Ok(false);
        };
        self.respond(&request).await?;
        Ok(true)
    }

    async fn respond(&self, request: &[u8]) -> Result<(), DiagnosticError> {
        debug!(request = ?request, "Received UDS request");

        if let Some(response) = self.handle_request(request) {
            debug!(response = ?response, "Sending UDS response");
            self.transport.send(&response).await?;
        }
        Ok(())
    }

    /// Serve requests until `shutdown` turns true
    ///
    /// Shutdown only interrupts the wait for a request; a response already
    /// being sent is finished first. Framing errors are logged and skipped; a
    /// channel failure ends the loop with an error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DiagnosticError> {
        self.span.in_scope(|| info!("UDS server running"));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => match changed {
                    Ok(()) => continue,
                    // Sender gone, nobody can stop us any more
                    Err(_) => break,
                },
                received = self.transport.receive(SERVE_POLL) => received,
            };

            let served = match received {
                Ok(Some(request)) => self.respond(&request).instrument(self.span.clone()).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e.into()),
            };

            match served {
                Ok(_) => {}
                Err(DiagnosticError::Transport(e)) if e.is_fatal() => {
                    self.span
                        .in_scope(|| error!(error = %e, "Transport failed, server stopping"));
                    return Err(e.into());
                }
                Err(DiagnosticError::Transport(TransportError::NotStarted)) => {
                    return Err(TransportError::NotStarted.into());
                }
                Err(e) => self.span.in_scope(|| warn!(error = %e, "Request failed")),
            }
        }

        self.span.in_scope(|| info!("UDS server stopped"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AsciiCodec, UnsignedCodec};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    /// Transport that never carries anything
    struct Silent;

    #[async_trait]
    impl PayloadTransport for Silent {
        async fn send(&self, _payload: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&self, timeout: Duration) -> Result<Option<Bytes>, TransportError> {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }
    }

    fn server() -> UdsServer {
        let mut registry = DidRegistry::new();
        registry.register(0xF190, Arc::new(AsciiCodec::new(15))).unwrap();
        registry.register(0x0100, Arc::new(UnsignedCodec::u16())).unwrap();
        registry.register(0x0200, Arc::new(UnsignedCodec::u16())).unwrap();

        let server = UdsServer::new(Arc::new(Silent), registry);
        server.set_value(0xF190, &"ABCDE0123456789".into()).unwrap();
        server.set_value(0x0100, &DidValue::Unsigned(0x1234)).unwrap();
        server
    }

    #[test]
    fn test_read_single_did() {
        let response = server().handle_request(&[0x22, 0xF1, 0x90]).unwrap();
        let mut expected = vec![0x62, 0xF1, 0x90];
        expected.extend_from_slice(b"ABCDE0123456789");
        assert_eq!(response, expected);
    }

    #[test]
    fn test_read_multiple_dids() {
        let response = server()
            .handle_request(&[0x22, 0x01, 0x00, 0xF1, 0x90])
            .unwrap();
        assert_eq!(&response[..6], &[0x62, 0x01, 0x00, 0x12, 0x34, 0xF1]);
        assert_eq!(response.len(), 1 + 4 + 2 + 15);
    }

    #[test]
    fn test_unsupported_did() {
        let server = server();
        assert_eq!(
            server.handle_request(&[0x22, 0x12, 0x34]),
            Some(vec![0x7F, 0x22, 0x31])
        );
        // Registered codec but no value
        assert_eq!(
            server.handle_request(&[0x22, 0x02, 0x00]),
            Some(vec![0x7F, 0x22, 0x31])
        );
        // One bad DID fails the whole request
        assert_eq!(
            server.handle_request(&[0x22, 0xF1, 0x90, 0x12, 0x34]),
            Some(vec![0x7F, 0x22, 0x31])
        );
    }

    #[test]
    fn test_read_bad_length() {
        let server = server();
        assert_eq!(server.handle_request(&[0x22]), Some(vec![0x7F, 0x22, 0x13]));
        assert_eq!(
            server.handle_request(&[0x22, 0xF1, 0x90, 0x01]),
            Some(vec![0x7F, 0x22, 0x13])
        );
    }

    #[test]
    fn test_unsupported_service() {
        let server = server();
        assert_eq!(
            server.handle_request(&[0x10, 0x03]),
            Some(vec![0x7F, 0x10, 0x11])
        );
        assert_eq!(server.handle_request(&[]), Some(vec![0x7F, 0x00, 0x13]));
    }

    #[test]
    fn test_tester_present() {
        let server = server();
        assert_eq!(server.handle_request(&[0x3E, 0x00]), Some(vec![0x7E, 0x00]));
        assert_eq!(server.handle_request(&[0x3E, 0x80]), None);
        assert_eq!(
            server.handle_request(&[0x3E, 0x05]),
            Some(vec![0x7F, 0x3E, 0x12])
        );
        assert_eq!(server.handle_request(&[0x3E]), Some(vec![0x7F, 0x3E, 0x13]));
    }

    #[test]
    fn test_set_value_validates() {
        let server = server();
        assert!(matches!(
            server.set_value(0xF190, &"SIXTEEN CHARS!!!".into()),
            Err(DiagnosticError::InvalidValue(_))
        ));
        assert_eq!(
            server.set_value(0x9999, &DidValue::Unsigned(1)),
            Err(DiagnosticError::UnsupportedIdentifier(0x9999))
        );
    }

    #[tokio::test]
    async fn test_serve_times_out() {
        let served = server().serve(Duration::from_millis(10)).await.unwrap();
        assert!(!served);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = Arc::new(server());
        let (tx, rx) = watch::channel(false);

        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
