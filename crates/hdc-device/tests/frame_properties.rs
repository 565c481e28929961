//! Property-based coverage of the frame codec: checksum law, round trips
//! through the device's encoder, and decoder robustness on byte soup.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use proptest::prelude::*;

use hdc_device::frame::checksum;
use hdc_testing::{deframe, demo_engine, frame_message, frame_request, DemoApp};

proptest! {
    /// `PS + Σ payload + CHK` folds to zero for every payload.
    #[test]
    fn checksum_folds_to_zero(payload in proptest::collection::vec(any::<u8>(), 0..=255)) {
        let ps = payload.len() as u8;
        let chk = checksum(ps, &payload);
        let fold = payload
            .iter()
            .fold(ps.wrapping_add(chk), |acc, &b| acc.wrapping_add(b));
        prop_assert_eq!(fold, 0);
    }

    /// Host-side framing and deframing are inverse for any message length,
    /// including 0, 255 and multiples of 255.
    #[test]
    fn host_framing_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..=600)) {
        let wire = frame_message(&payload);
        let messages = deframe(&wire).unwrap();
        prop_assert_eq!(messages, vec![payload]);
    }

    /// Whatever the device emits deframes cleanly: events of arbitrary
    /// size exercise the streaming encoder across packet and buffer
    /// boundaries.
    #[test]
    fn device_encoder_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..=600)) {
        let mut engine = demo_engine();
        engine.emit_event(None, 0x01, &payload).unwrap();
        engine.flush();
        let messages = deframe(engine.transport().wire()).unwrap();
        prop_assert_eq!(messages.len(), 1);
        let mut expected = vec![0xF3, 0x00, 0x01];
        expected.extend_from_slice(&payload);
        prop_assert_eq!(&messages[0], &expected);
    }

    /// Echo requests reproduce themselves byte for byte.
    #[test]
    fn echo_round_trips(tail in proptest::collection::vec(any::<u8>(), 0..=127)) {
        let mut engine = demo_engine();
        let mut app = DemoApp::new();
        let mut request = vec![0xF1u8];
        request.extend_from_slice(&tail);
        engine.transport_mut().push_burst(&frame_request(&request));
        engine.work(&mut app);
        let messages = deframe(engine.transport().wire()).unwrap();
        prop_assert_eq!(messages, vec![request]);
    }

    /// Arbitrary byte soup never panics the engine and never corrupts its
    /// output framing; afterwards the engine still answers.
    #[test]
    fn decoder_survives_byte_soup(
        bursts in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..=64),
            0..=8,
        )
    ) {
        let mut engine = demo_engine();
        let mut app = DemoApp::new();
        let n = bursts.len();
        for burst in bursts {
            engine.transport_mut().push_burst(&burst);
        }
        for _ in 0..n {
            engine.work(&mut app);
        }
        engine.flush();
        // Device output must deframe whatever went in.
        let wire = engine.transport_mut().take_wire();
        deframe(&wire).unwrap();
        // A full buffer of slipped bytes forces the decoder to resolve any
        // plausible-but-incomplete prefix left by the soup and restart.
        engine.transport_mut().push_burst(&[0xFF; 131]);
        engine.work(&mut app);
        let wire = engine.transport_mut().take_wire();
        deframe(&wire).unwrap();
        // And the engine keeps serving requests.
        engine.transport_mut().push_burst(&frame_request(&[0xF1, 0x55]));
        engine.work(&mut app);
        let wire = engine.transport_mut().take_wire();
        let messages = deframe(&wire).unwrap();
        prop_assert!(messages.iter().any(|m| m.as_slice() == [0xF1, 0x55]));
    }

    /// An oversized-PS byte in front of a valid packet is recovered within
    /// the same buffer. (A plausible small PS instead makes the decoder
    /// wait for more bytes, which is the correct behavior, not recovery.)
    #[test]
    fn decoder_resynchronizes_after_noise(noise in 129u8..=255) {
        let mut engine = demo_engine();
        let mut app = DemoApp::new();
        let mut burst = vec![noise];
        burst.extend_from_slice(&frame_request(&[0xF1, b'r']));
        engine.transport_mut().push_burst(&burst);
        engine.work(&mut app);
        let messages = deframe(engine.transport().wire()).unwrap();
        prop_assert!(messages.iter().any(|m| m.as_slice() == [0xF1, b'r']));
    }
}
