//! Reliable exchange over the virtual bus, raw and ISO-TP

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use diagwire_core::{CanId, Frame, FrameChannel, VirtualBus};
use diagwire_exchange::{
    any_message, did_match, from_id, payload_prefix, AttemptFailure, ExchangeError, PayloadLink,
    RawLink, ReliableExchange, RetryPolicy,
};
use diagwire_isotp::{Address, IsoTpConfig, IsoTpTransport, PayloadTransport};
use pretty_assertions::assert_eq;

const SENDER: CanId = CanId::Standard(0x33);
const RECEIVER: CanId = CanId::Standard(0x34);
const RAW_PAYLOAD: [u8; 8] = [0, 25, 0, 1, 3, 1, 4, 1];

fn policy(retries: u32, timeout_ms: u64) -> RetryPolicy {
    RetryPolicy::new(retries, Duration::from_millis(timeout_ms))
}

async fn isotp(bus: &VirtualBus, tx: u32, rx: u32) -> Arc<IsoTpTransport> {
    let transport =
        IsoTpTransport::new(Arc::new(bus.connect()), IsoTpConfig::new(Address::normal(tx, rx)))
            .unwrap();
    transport.start().await.unwrap();
    Arc::new(transport)
}

#[tokio::test]
async fn test_raw_payload_is_one_frame() {
    let bus = VirtualBus::new();
    let sniffer = bus.connect();
    let peer = bus.connect();

    let responder = tokio::spawn(async move {
        let frame = peer.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        peer.send(&Frame::new(RECEIVER, vec![0x01]).unwrap())
            .await
            .unwrap();
        frame
    });

    let link = RawLink::new(Arc::new(bus.connect()), SENDER)
        .listen_to(RECEIVER)
        .unwrap();
    let message = link.frame(&RAW_PAYLOAD).unwrap();
    let exchange = ReliableExchange::new(link, policy(3, 1000));

    let acked = exchange.send(&message, &from_id(RECEIVER)).await.unwrap();
    assert_eq!(acked.attempts, 1);
    assert_eq!(acked.ack.data(), &[0x01]);

    let seen_by_peer = responder.await.unwrap();
    assert_eq!(seen_by_peer.data(), &RAW_PAYLOAD);

    // Exactly the data frame and the acknowledgment, no flow control
    let mut wire = Vec::new();
    while let Some(frame) = sniffer.receive(Duration::from_millis(100)).await.unwrap() {
        wire.push((frame.id(), frame.data().to_vec()));
    }
    assert_eq!(
        wire,
        vec![(SENDER, RAW_PAYLOAD.to_vec()), (RECEIVER, vec![0x01])]
    );
}

#[tokio::test]
async fn test_raw_exhausts_budget_without_peer() {
    let bus = VirtualBus::new();
    let sniffer = bus.connect();

    let link = RawLink::new(Arc::new(bus.connect()), SENDER);
    let message = link.frame(&RAW_PAYLOAD).unwrap();
    let exchange = ReliableExchange::new(link, policy(3, 50));

    let err = exchange
        .send(&message, &from_id(RECEIVER))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExchangeError::TransmissionFailed {
            attempts: 3,
            last_failure: AttemptFailure::NoAcknowledgment(_),
        }
    ));

    let mut sent = 0;
    while let Some(frame) = sniffer.receive(Duration::from_millis(100)).await.unwrap() {
        assert_eq!(frame.data(), &RAW_PAYLOAD);
        sent += 1;
    }
    assert_eq!(sent, 3);
}

#[tokio::test]
async fn test_raw_acknowledged_on_second_attempt() {
    let bus = VirtualBus::new();
    let peer = bus.connect();

    // Stay silent for the first frame, acknowledge the second
    let responder = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(_frame) = peer.receive(Duration::from_secs(1)).await.unwrap() {
            seen += 1;
            if seen == 2 {
                peer.send(&Frame::new(RECEIVER, vec![0x01]).unwrap())
                    .await
                    .unwrap();
                break;
            }
        }
        seen
    });

    let link = RawLink::new(Arc::new(bus.connect()), SENDER);
    let message = link.frame(&RAW_PAYLOAD).unwrap();
    let exchange = ReliableExchange::new(link, policy(3, 200));

    let acked = exchange.send(&message, &from_id(RECEIVER)).await.unwrap();
    assert_eq!(acked.attempts, 2);
    assert_eq!(responder.await.unwrap(), 2);
}

#[tokio::test]
async fn test_raw_channel_failure_aborts() {
    let bus = VirtualBus::new();
    let link = RawLink::new(Arc::new(bus.connect()), SENDER);
    let message = link.frame(&RAW_PAYLOAD).unwrap();
    let exchange = ReliableExchange::new(link, policy(3, 100));

    bus.shutdown();
    let err = exchange.send(&message, &any_message()).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Channel { attempt: 1, .. }));
}

#[tokio::test]
async fn test_isotp_payload_acknowledged() {
    let bus = VirtualBus::new();
    let sender = isotp(&bus, 0x33, 0x34).await;
    let receiver = isotp(&bus, 0x34, 0x33).await;

    let responder = tokio::spawn(async move {
        let payload = receiver
            .receive(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        receiver.send(&[0x01]).await.unwrap();
        payload
    });

    let payload: Bytes = (0x41..0x41 + 14).collect::<Vec<u8>>().into();
    let exchange = ReliableExchange::new(PayloadLink::new(sender), policy(3, 1000));
    let acked = exchange
        .send(&payload, &payload_prefix(vec![0x01]))
        .await
        .unwrap();

    assert_eq!(acked.attempts, 1);
    assert_eq!(responder.await.unwrap(), payload);
}

#[tokio::test]
async fn test_isotp_did_match_ignores_other_responses() {
    let bus = VirtualBus::new();
    let sender = isotp(&bus, 0x33, 0x34).await;
    let receiver = isotp(&bus, 0x34, 0x33).await;

    tokio::spawn(async move {
        let _request = receiver.receive(Duration::from_secs(1)).await.unwrap();
        // Wrong DID first, then the one asked for
        receiver.send(&[0x62, 0x01, 0x00, 0x00, 0x01]).await.unwrap();
        receiver.send(&[0x62, 0xF1, 0x90, b'A']).await.unwrap();
    });

    let exchange = ReliableExchange::new(PayloadLink::new(sender), policy(3, 1000));
    let acked = exchange
        .send(&Bytes::from_static(&[0x22, 0xF1, 0x90]), &did_match(0xF190))
        .await
        .unwrap();

    assert_eq!(acked.attempts, 1);
    assert_eq!(acked.ack.as_ref(), &[0x62, 0xF1, 0x90, b'A']);
}

#[tokio::test]
async fn test_isotp_budget_exhausted() {
    let bus = VirtualBus::new();
    let sender = isotp(&bus, 0x33, 0x34).await;
    let _receiver = isotp(&bus, 0x34, 0x33).await;

    let exchange = ReliableExchange::new(PayloadLink::new(sender), policy(2, 100));
    let err = exchange
        .send(&Bytes::from_static(&[0x3E, 0x00]), &payload_prefix(vec![0x7E]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExchangeError::TransmissionFailed { attempts: 2, .. }
    ));
}
