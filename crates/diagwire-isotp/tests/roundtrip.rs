//! Segmentation / reassembly round-trip properties

use bytes::Bytes;
use diagwire_isotp::{segment, FrameLayout, Reassembler, RxEvent, MAX_PAYLOAD_LEN};
use proptest::prelude::*;

fn reassemble(frames: &[Vec<u8>], strip: usize) -> Option<Bytes> {
    let mut rx = Reassembler::new(0, MAX_PAYLOAD_LEN);
    let mut completed = None;
    for frame in frames {
        match rx.on_frame(&frame[strip..]).ok()? {
            RxEvent::Complete(payload) => completed = Some(payload),
            RxEvent::SendFlowControl | RxEvent::Continue => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
    completed
}

fn layouts() -> impl Strategy<Value = FrameLayout> {
    (
        prop_oneof![Just(8usize), Just(12), Just(32), Just(64)],
        proptest::option::of(any::<u8>()),
        proptest::option::of(any::<u8>()),
    )
        .prop_map(|(frame_len, extension, padding)| FrameLayout {
            frame_len,
            fd: frame_len > 8,
            address_extension: extension,
            padding,
        })
}

proptest! {
    #[test]
    fn segment_then_reassemble(
        payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_LEN),
        layout in layouts(),
    ) {
        let frames = segment(&payload, &layout).unwrap();
        prop_assert!(frames.iter().all(|f| f.len() <= layout.frame_len));

        let strip = usize::from(layout.address_extension.is_some());
        let got = reassemble(&frames, strip);
        prop_assert_eq!(got, Some(Bytes::from(payload)));
    }

    #[test]
    fn sequence_numbers_wrap(len in 200usize..=MAX_PAYLOAD_LEN) {
        let frames = segment(&vec![0u8; len], &FrameLayout::default()).unwrap();
        for (i, frame) in frames.iter().enumerate().skip(1) {
            prop_assert_eq!(frame[0], 0x20 | (i % 16) as u8);
        }
    }
}

#[test]
fn every_length_round_trips() {
    let layout = FrameLayout {
        padding: Some(0xCC),
        ..FrameLayout::default()
    };
    for len in 0..=MAX_PAYLOAD_LEN {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let frames = segment(&payload, &layout).unwrap();
        assert_eq!(reassemble(&frames, 0), Some(Bytes::from(payload)), "length {}", len);
    }
}
