//! End-to-end scenarios against the reference device: echo, meta queries,
//! command replies, events and the decoder's recovery behavior.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use hdc_device::engine::{Engine, EngineOptions};
use hdc_device::{LogLevel, MessageContext, PROTOCOL_VERSION};
use hdc_testing::{
    deframe, demo_device, demo_engine, frame_request, transact, DemoApp, MockTransport,
    CMD_RESET, EVT_BUTTON, FEATURE_BLINKY, FEATURE_CORE, STATE_OFF,
};

#[test]
fn test_echo_round_trip() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let request = [0xF1, b'p', b'i', b'n', b'g'];
    let replies = transact(&mut engine, &mut app, &request);
    assert_eq!(replies, vec![request.to_vec()]);
}

#[test]
fn test_meta_version() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF0, 0xF0]);
    let mut expected = vec![0xF0, 0xF0];
    expected.extend_from_slice(PROTOCOL_VERSION.as_bytes());
    assert_eq!(replies, vec![expected]);
}

#[test]
fn test_meta_max_req_is_little_endian_u32() {
    let mut engine = demo_engine();
    assert_eq!(engine.max_request_size(), 128);
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF0, 0xF1]);
    assert_eq!(replies, vec![vec![0xF0, 0xF1, 0x80, 0x00, 0x00, 0x00]]);
}

#[test]
fn test_meta_with_trailing_bytes_is_echoed_with_error_log() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let request = [0xF0, 0xF1, 0xAA];
    let replies = transact(&mut engine, &mut app, &request);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0], request.to_vec());
    // Best-effort ERROR log on Core.
    assert_eq!(&replies[1][..4], &[0xF3, 0x00, 0xF0, 40]);
    assert_eq!(&replies[1][4..], b"Malformed meta request");
}

#[test]
fn test_meta_without_query_byte_is_echoed() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF0]);
    assert_eq!(replies[0], vec![0xF0]);
}

#[test]
fn test_unknown_feature_reply() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF2, 0x07, 0xF0, 0x10]);
    assert_eq!(replies, vec![vec![0xF2, 0x07, 0xF0, 0xF1]]);
}

#[test]
fn test_unknown_command_reply() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF2, 0x00, 0x7E]);
    assert_eq!(replies, vec![vec![0xF2, 0x00, 0x7E, 0xF2]]);
}

#[test]
fn test_command_reply_header_mirrors_request() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let request = [0xF2, 0x00, 0xF0, 0x10];
    let replies = transact(&mut engine, &mut app, &request);
    assert_eq!(&replies[0][..3], &request[..3]);
    assert_eq!(replies[0][3], 0x00);
}

#[test]
fn test_reset_replies_then_emits_state_transition() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF2, 0x00, CMD_RESET]);
    assert_eq!(replies.len(), 2);
    // Void reply first, transition event second.
    assert_eq!(replies[0], vec![0xF2, 0x00, CMD_RESET, 0x00]);
    assert_eq!(replies[1], vec![0xF3, 0x00, 0xF1, 0x01, 0x00]);
    assert_eq!(engine.feature_state(FEATURE_CORE), Some(STATE_OFF));
    assert_eq!(app.reset_count, 1);
}

#[test]
fn test_empty_message_is_ignored() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    engine.transport_mut().push_burst(&[0x00, 0x00, 0x1E]);
    engine.work(&mut app);
    assert!(engine.transport().wire().is_empty());
}

#[test]
fn test_incoming_event_is_dropped_with_error_log() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF3, 0x00, 0x01]);
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][..4], &[0xF3, 0x00, 0xF0, 40]);
    assert_eq!(&replies[0][4..], b"Unknown message type");
}

#[test]
fn test_unreserved_type_without_router_logs_error() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0x10, 0xAB]);
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][4..], b"Unknown message type");
}

fn custom_router(ctx: &mut MessageContext<'_>, request: &[u8]) {
    // Application class 0x10: reply with the payload reversed.
    let mut payload: Vec<u8> = request[1..].to_vec();
    payload.reverse();
    ctx.reply_parts(&[&[request[0]], &payload]);
}

#[test]
fn test_custom_router_handles_unreserved_types() {
    let options = EngineOptions {
        raw_message_handler: Some(custom_router),
    };
    let mut engine: hdc_testing::DemoEngine =
        Engine::with_options(demo_device(), MockTransport::new(), options).unwrap();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0x10, 1, 2, 3]);
    assert_eq!(replies, vec![vec![0x10, 3, 2, 1]]);
}

#[test]
fn test_reserved_types_are_never_delegated() {
    let options = EngineOptions {
        raw_message_handler: Some(custom_router),
    };
    let mut engine: hdc_testing::DemoEngine =
        Engine::with_options(demo_device(), MockTransport::new(), options).unwrap();
    let mut app = DemoApp::new();
    let request = [0xF1, b'x'];
    let replies = transact(&mut engine, &mut app, &request);
    assert_eq!(replies, vec![request.to_vec()]);
}

#[test]
fn test_short_command_request_is_dropped_with_error_log() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let replies = transact(&mut engine, &mut app, &[0xF2, 0x00]);
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][..4], &[0xF3, 0x00, 0xF0, 40]);
    assert_eq!(&replies[0][4..], b"Command request too short");
}

#[test]
fn test_packet_split_across_bursts() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let request = frame_request(&[0xF1, b'h', b'i']);
    engine.transport_mut().push_burst(&request[..2]);
    engine.work(&mut app);
    assert!(engine.transport().wire().is_empty());
    engine.transport_mut().push_burst(&request[2..]);
    engine.work(&mut app);
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies, vec![vec![0xF1, b'h', b'i']]);
}

#[test]
fn test_garbage_prefix_recovers_and_warns() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let mut burst = vec![0xFF, 0xFF];
    burst.extend_from_slice(&frame_request(&[0xF1, b'z']));
    engine.transport_mut().push_burst(&burst);
    engine.work(&mut app);
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies.len(), 2);
    // The dispatched reply goes out before the frame-error warning.
    assert_eq!(replies[0], vec![0xF1, b'z']);
    assert_eq!(&replies[1][..4], &[0xF3, 0x00, 0xF0, 30]);
    assert_eq!(&replies[1][4..], b"Reading-frame errors: 2");
}

#[test]
fn test_pure_garbage_warns_and_restarts_reception() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    engine.transport_mut().push_burst(&[0xFF; 5]);
    engine.work(&mut app);
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][4..], b"Reading-frame errors: 5");
    assert!(engine.transport().resets() >= 1);
    // The engine is immediately usable again.
    engine.transport_mut().take_wire();
    let echo = transact(&mut engine, &mut app, &[0xF1, b'k']);
    assert_eq!(echo, vec![vec![0xF1, b'k']]);
}

#[test]
fn test_frame_error_warning_respects_core_threshold() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    // Raise the core threshold above WARNING via SetPropertyValue.
    let replies = transact(&mut engine, &mut app, &[0xF2, 0x00, 0xF1, 0xF0, 50]);
    assert_eq!(replies[0][3], 0x00);
    engine.transport_mut().push_burst(&[0xFF; 3]);
    engine.work(&mut app);
    assert!(engine.transport().wire().is_empty());
}

#[test]
fn test_app_emitted_event_reaches_the_wire() {
    let mut engine = demo_engine();
    engine
        .emit_event(Some(FEATURE_BLINKY), EVT_BUTTON, &[2, 1])
        .unwrap();
    engine.flush();
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies, vec![vec![0xF3, FEATURE_BLINKY, EVT_BUTTON, 2, 1]]);
}

#[test]
fn test_emit_event_on_unknown_feature_is_refused() {
    let mut engine = demo_engine();
    assert!(engine.emit_event(Some(0x55), 0x01, &[]).is_err());
}

#[test]
fn test_emit_log_filtered_by_feature_threshold() {
    let mut engine = demo_engine();
    // Blinky starts at INFO: DEBUG is dropped, INFO goes out.
    engine
        .emit_log(Some(FEATURE_BLINKY), LogLevel::Debug, "quiet")
        .unwrap();
    engine.flush();
    assert!(engine.transport().wire().is_empty());
    engine
        .emit_log(Some(FEATURE_BLINKY), LogLevel::Info, "loud")
        .unwrap();
    engine.flush();
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][..4], &[0xF3, FEATURE_BLINKY, 0xF0, 20]);
    assert_eq!(&replies[0][4..], b"loud");
}

#[test]
fn test_set_feature_state_same_state_is_noop() {
    let mut engine = demo_engine();
    engine
        .set_feature_state(Some(FEATURE_CORE), 0x01)
        .unwrap();
    engine.flush();
    assert!(engine.transport().wire().is_empty());
}

#[test]
fn test_set_feature_state_rejects_undeclared_state() {
    let mut engine = demo_engine();
    assert!(engine.set_feature_state(Some(FEATURE_CORE), 0x7F).is_err());
    // Blinky declares no states, so anything goes.
    engine.set_feature_state(Some(FEATURE_BLINKY), 0x7F).unwrap();
    assert_eq!(engine.feature_state(FEATURE_BLINKY), Some(0x7F));
}

#[test]
fn test_set_feature_state_defaults_to_core() {
    let mut engine = demo_engine();
    engine.set_feature_state(None, STATE_OFF).unwrap();
    engine.flush();
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies, vec![vec![0xF3, 0x00, 0xF1, 0x01, 0x00]]);
}

#[test]
fn test_oversized_request_is_counted_not_parsed() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    // PS = 200 exceeds the 128-byte limit; every byte slips the frame.
    engine.transport_mut().push_burst(&[200u8; 11]);
    engine.work(&mut app);
    let replies = deframe(engine.transport().wire()).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][4..], b"Reading-frame errors: 11");
}
