//! UDS client (tester side)

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use diagwire_isotp::{PayloadTransport, TransportError};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument, Span};

use crate::codec::DidValue;
use crate::message::Response;
use crate::service_id::{READ_DATA_BY_ID, TESTER_PRESENT};
use crate::{DiagnosticError, DidRegistry, NegativeResponseCode, SUPPRESS_POSITIVE_RESPONSE};

const DEFAULT_P2_STAR: Duration = Duration::from_millis(5000);

/// Diagnostic client bound to one transport
#[derive(Clone)]
pub struct UdsClient {
    transport: Arc<dyn PayloadTransport>,
    registry: Arc<DidRegistry>,
    p2_star: Duration,
    span: Span,
}

impl UdsClient {
    pub fn new(transport: Arc<dyn PayloadTransport>, registry: DidRegistry) -> Self {
        Self {
            transport,
            registry: Arc::new(registry),
            p2_star: DEFAULT_P2_STAR,
            span: tracing::info_span!("uds_client"),
        }
    }

    /// Wait this long after each response-pending answer
    pub fn with_p2_star(mut self, p2_star: Duration) -> Self {
        self.p2_star = p2_star;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn registry(&self) -> &DidRegistry {
        &self.registry
    }

    /// Send a request and wait for the response to it
    ///
    /// Payloads that do not answer `request[0]`, or that `accept` rejects,
    /// are skipped. A response-pending answer extends the deadline by P2*.
    pub async fn request<F>(
        &self,
        request: &[u8],
        timeout: Duration,
        accept: F,
    ) -> Result<Bytes, DiagnosticError>
    where
        F: Fn(&[u8]) -> bool + Send,
    {
        self.exchange(request, timeout, accept)
            .instrument(self.span.clone())
            .await
    }

    async fn exchange<F>(
        &self,
        request: &[u8],
        timeout: Duration,
        accept: F,
    ) -> Result<Bytes, DiagnosticError>
    where
        F: Fn(&[u8]) -> bool + Send,
    {
        let service = *request
            .first()
            .ok_or_else(|| DiagnosticError::InvalidValue("Empty request".to_string()))?;

        self.transport.send(request).await?;
        debug!(service = format!("0x{:02X}", service), len = request.len(), "Request sent");

        let mut deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(service = format!("0x{:02X}", service), "No response");
                return Err(DiagnosticError::Timeout);
            }

            let payload = match self.transport.receive(remaining).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(TransportError::Protocol(e)) => {
                    warn!(error = %e, "Discarding malformed response");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match Response::parse(&payload) {
                Ok(Response::Negative { service: s, code }) if s == service => {
                    if code == NegativeResponseCode::ResponsePending {
                        debug!("Response pending, extending deadline");
                        deadline = Instant::now() + self.p2_star;
                        continue;
                    }
                    warn!(service = format!("0x{:02X}", service), nrc = %code, "Negative response");
                    return Err(DiagnosticError::Negative { service, code });
                }
                Ok(Response::Positive { service: s, data }) if s == service && accept(data) => {
                    return Ok(payload);
                }
                _ => debug!(payload = ?payload, "Ignoring unrelated payload"),
            }
        }
    }

    /// Read Data By Identifier (0x22), one DID
    pub async fn read_data_by_identifier(
        &self,
        did: u16,
        timeout: Duration,
    ) -> Result<DidValue, DiagnosticError> {
        let mut values = self.read_data_by_identifiers(&[did], timeout).await?;
        values
            .pop()
            .map(|(_, value)| value)
            .ok_or_else(|| DiagnosticError::InvalidResponse("Empty response".to_string()))
    }

    /// Read Data By Identifier (0x22), several DIDs in one request
    pub async fn read_data_by_identifiers(
        &self,
        dids: &[u16],
        timeout: Duration,
    ) -> Result<Vec<(u16, DidValue)>, DiagnosticError> {
        // Fail before touching the bus if we could not decode the answer
        for &did in dids {
            self.registry.resolve(did)?;
        }
        let Some(&first) = dids.first() else {
            return Ok(Vec::new());
        };

        let mut request = Vec::with_capacity(1 + 2 * dids.len());
        request.push(READ_DATA_BY_ID);
        for did in dids {
            request.extend_from_slice(&did.to_be_bytes());
        }

        let echoed = first.to_be_bytes();
        let response = self
            .request(&request, timeout, |data| data.starts_with(&echoed))
            .await?;

        let values = self.registry.decode_records(dids, &response[1..])?;
        for (did, value) in &values {
            debug!(did = format!("0x{:04X}", did), %value, "DID read");
        }
        Ok(values)
    }

    /// Tester Present (0x3E)
    ///
    /// With `suppress_response` the server stays silent and this returns as
    /// soon as the request is sent.
    pub async fn tester_present(
        &self,
        suppress_response: bool,
        timeout: Duration,
    ) -> Result<(), DiagnosticError> {
        let sub_function = if suppress_response {
            SUPPRESS_POSITIVE_RESPONSE
        } else {
            0x00
        };
        let request = [TESTER_PRESENT, sub_function];

        if suppress_response {
            self.transport.send(&request).await?;
            return Ok(());
        }
        self.request(&request, timeout, |data| data.first() == Some(&0x00))
            .await?;
        Ok(())
    }
}
