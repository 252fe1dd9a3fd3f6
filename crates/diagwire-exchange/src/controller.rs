//! Reliable exchange controller
//!
//! One exchange is: transmit, then wait up to the attempt timeout for a
//! message the [`AckPredicate`] accepts. Messages it rejects are ignored. When
//! the attempt times out or hits a framing error the message is sent again,
//! until the attempt budget is spent. Channel failures end the exchange at
//! once. There is no backoff between attempts. Anything already queued on the
//! link is discarded before each transmission.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::{AckPredicate, AttemptFailure, ExchangeError, ExchangeLink, LinkError, RetryPolicy};

/// A successful exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledged<M> {
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub ack: M,
}

/// Retrying sender over any [`ExchangeLink`]
pub struct ReliableExchange<L> {
    link: L,
    policy: RetryPolicy,
    span: Span,
}

impl<L: ExchangeLink> ReliableExchange<L> {
    pub fn new(link: L, policy: RetryPolicy) -> Self {
        Self {
            link,
            policy,
            span: tracing::info_span!("exchange"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `message` until something matching `ack` comes back
    pub async fn send(
        &self,
        message: &L::Message,
        ack: &AckPredicate<L::Message>,
    ) -> Result<Acknowledged<L::Message>, ExchangeError> {
        self.run(message, ack).instrument(self.span.clone()).await
    }

    async fn run(
        &self,
        message: &L::Message,
        ack: &AckPredicate<L::Message>,
    ) -> Result<Acknowledged<L::Message>, ExchangeError> {
        let budget = self.policy.retries;
        let timeout = self.policy.attempt_timeout();
        let mut last_failure = AttemptFailure::NotAttempted;

        for attempt in 1..=budget {
            let remaining = budget - attempt;
            debug!(attempt, remaining, ?message, "Transmitting");

            match self.attempt(message, ack).await {
                Ok(Some(reply)) => {
                    info!(attempt, ack = ack.description(), "Acknowledged");
                    return Ok(Acknowledged {
                        attempts: attempt,
                        ack: reply,
                    });
                }
                Ok(None) => {
                    warn!(
                        attempt,
                        remaining,
                        timeout_ms = timeout.as_millis() as u64,
                        ack = ack.description(),
                        "No acknowledgment"
                    );
                    last_failure = AttemptFailure::NoAcknowledgment(timeout);
                }
                Err(LinkError::Protocol(e)) => {
                    warn!(attempt, remaining, error = %e, "Attempt failed");
                    last_failure = AttemptFailure::Protocol(e);
                }
                Err(LinkError::Channel(e)) => {
                    error!(attempt, error = %e, "Channel failed, giving up");
                    return Err(ExchangeError::Channel { attempt, source: e });
                }
                Err(LinkError::NotStarted) => {
                    error!(attempt, "Link not started");
                    return Err(ExchangeError::NotStarted);
                }
            }
        }

        error!(attempts = budget, last_failure = %last_failure, "Transmission failed");
        Err(ExchangeError::TransmissionFailed {
            attempts: budget,
            last_failure,
        })
    }

    /// One transmission plus its acknowledgment window
    async fn attempt(
        &self,
        message: &L::Message,
        ack: &AckPredicate<L::Message>,
    ) -> Result<Option<L::Message>, LinkError> {
        self.discard_stale().await?;
        self.link.transmit(message).await?;

        let deadline = Instant::now() + self.policy.attempt_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.link.receive(remaining).await? {
                Some(reply) if ack.matches(&reply) => return Ok(Some(reply)),
                Some(other) => debug!(message = ?other, "Ignoring non-matching message"),
                None => {}
            }
        }
    }

    /// Drop whatever is already queued so only replies to the next
    /// transmission can acknowledge it
    async fn discard_stale(&self) -> Result<(), LinkError> {
        loop {
            match self.link.receive(Duration::ZERO).await {
                Ok(Some(stale)) => debug!(message = ?stale, "Discarding stale message"),
                Ok(None) => return Ok(()),
                Err(LinkError::Protocol(e)) => debug!(error = %e, "Discarding stale error"),
                Err(e) => return Err(e),
            }
        }
    }
}
