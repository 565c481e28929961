//! The streamed JSON self-description, validated with a real JSON parser.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use serde_json::Value;

use hdc_device::PROTOCOL_VERSION;
use hdc_testing::{demo_engine, transact, DemoApp};

fn idl(engine: &mut hdc_testing::DemoEngine, app: &mut DemoApp) -> Value {
    let replies = transact(engine, app, &[0xF0, 0xF2]);
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][..2], &[0xF0, 0xF2]);
    serde_json::from_slice(&replies[0][2..]).expect("device description must be valid JSON")
}

fn feature<'a>(doc: &'a Value, index: usize) -> &'a Value {
    &doc["features"][index]
}

fn by_id<'a>(array: &'a Value, id: u64) -> &'a Value {
    array
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["id"].as_u64() == Some(id))
        .unwrap_or_else(|| panic!("no entry with id {id}"))
}

#[test]
fn test_document_top_level_shape() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    assert_eq!(doc["version"].as_str(), Some(PROTOCOL_VERSION));
    assert_eq!(doc["max_req"].as_u64(), Some(128));
    assert_eq!(doc["features"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_description_spans_multiple_packets() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    engine
        .transport_mut()
        .push_burst(&hdc_testing::frame_request(&[0xF0, 0xF2]));
    engine.work(&mut app);
    let wire = engine.transport_mut().take_wire();
    // The demo device's description is far larger than one packet.
    assert!(wire.len() > 258);
    assert_eq!(hdc_testing::deframe(&wire).unwrap().len(), 1);
}

#[test]
fn test_feature_identity_fields() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    let core = feature(&doc, 0);
    assert_eq!(core["id"].as_u64(), Some(0));
    assert_eq!(core["name"].as_str(), Some("core"));
    assert_eq!(core["cls"].as_str(), Some("DemoCore"));
    assert_eq!(core["version"].as_str(), Some("1.0"));
    assert_eq!(core["doc"].as_str(), Some("Core feature of the demo device."));
    let blinky = feature(&doc, 1);
    assert_eq!(blinky["id"].as_u64(), Some(1));
    assert_eq!(blinky["name"].as_str(), Some("blinky"));
}

#[test]
fn test_states_serialized_with_optional_doc() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    let states = &feature(&doc, 0)["states"];
    let off = by_id(states, 0);
    assert_eq!(off["name"].as_str(), Some("off"));
    assert!(off.get("doc").is_none(), "absent docs are omitted, not null");
    let running = by_id(states, 1);
    assert_eq!(running["doc"].as_str(), Some("Normal operation."));
    // The stateless feature still carries an (empty) states array.
    assert_eq!(feature(&doc, 1)["states"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_mandatory_commands_appended_to_every_feature() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    for index in 0..2 {
        let commands = &feature(&doc, index)["commands"];
        let get = by_id(commands, 0xF0);
        assert_eq!(get["name"].as_str(), Some("GetPropertyValue"));
        assert_eq!(get["args"][0]["dtype"].as_str(), Some("UINT8"));
        assert_eq!(get["args"][0]["name"].as_str(), Some("property_id"));
        assert_eq!(get["returns"][0]["dtype"].as_str(), Some("BLOB"));
        let raises = get["raises"].as_array().unwrap();
        assert_eq!(raises.len(), 1);
        assert_eq!(raises[0]["id"].as_u64(), Some(0xF5));
        assert_eq!(raises[0]["name"].as_str(), Some("UnknownProperty"));

        let set = by_id(commands, 0xF1);
        assert_eq!(set["name"].as_str(), Some("SetPropertyValue"));
        assert_eq!(set["args"][1]["name"].as_str(), Some("new_value"));
        let raises = set["raises"].as_array().unwrap();
        assert_eq!(raises.len(), 2);
        assert!(raises.iter().any(|r| r["id"].as_u64() == Some(0xF5)));
        assert!(raises.iter().any(|r| r["id"].as_u64() == Some(0xF6)));
    }
    // User commands precede the mandatory ones.
    let core_commands = feature(&doc, 0)["commands"].as_array().unwrap();
    assert_eq!(core_commands[0]["name"].as_str(), Some("Reset"));
    assert_eq!(core_commands.len(), 3);
}

#[test]
fn test_command_without_args_omits_the_arrays() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    let reset = by_id(&feature(&doc, 0)["commands"], 0x01);
    assert!(reset.get("args").is_none());
    assert!(reset.get("returns").is_none());
    assert!(reset.get("raises").is_none());
    assert_eq!(reset["doc"].as_str(), Some("Reboots the device."));
}

#[test]
fn test_mandatory_events_use_snake_case_arg_names() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    for index in 0..2 {
        let events = &feature(&doc, index)["events"];
        let log = by_id(events, 0xF0);
        assert_eq!(log["name"].as_str(), Some("Log"));
        assert_eq!(log["args"][0]["name"].as_str(), Some("log_level"));
        assert_eq!(log["args"][1]["name"].as_str(), Some("log_msg"));
        assert_eq!(log["args"][1]["dtype"].as_str(), Some("UTF8"));
        let transition = by_id(events, 0xF1);
        assert_eq!(transition["name"].as_str(), Some("FeatureStateTransition"));
        assert_eq!(transition["args"][0]["name"].as_str(), Some("previous_state"));
        assert_eq!(transition["args"][1]["name"].as_str(), Some("current_state"));
    }
    // The blinky button event keeps its position before the mandatory pair.
    let blinky_events = feature(&doc, 1)["events"].as_array().unwrap();
    assert_eq!(blinky_events[0]["name"].as_str(), Some("ButtonEvent"));
    assert_eq!(blinky_events.len(), 3);
}

#[test]
fn test_property_entries() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    let properties = &feature(&doc, 0)["properties"];

    let devid = by_id(properties, 0x10);
    assert_eq!(devid["name"].as_str(), Some("uc_devid"));
    assert_eq!(devid["dtype"].as_str(), Some("UINT32"));
    assert_eq!(devid["ro"].as_bool(), Some(true));
    assert!(devid.get("size").is_none(), "fixed widths carry no size");

    let name = by_id(properties, 0x11);
    assert_eq!(name["dtype"].as_str(), Some("UTF8"));
    assert_eq!(name["size"].as_u64(), Some(16));
    assert!(name.get("doc").is_none());

    let calibration = by_id(properties, 0x12);
    assert_eq!(calibration["dtype"].as_str(), Some("BLOB"));
    assert_eq!(calibration["size"].as_u64(), Some(8));

    let threshold = by_id(properties, 0xF0);
    assert_eq!(threshold["name"].as_str(), Some("log_event_threshold"));
    assert_eq!(threshold["ro"].as_bool(), Some(false));
    let state = by_id(properties, 0xF1);
    assert_eq!(state["name"].as_str(), Some("feature_state"));
    assert_eq!(state["ro"].as_bool(), Some(true));
}

#[test]
fn test_computed_property_has_no_size() {
    let mut engine = demo_engine();
    let mut app = DemoApp::new();
    let doc = idl(&mut engine, &mut app);
    let rate = by_id(&feature(&doc, 1)["properties"], 0x01);
    assert_eq!(rate["dtype"].as_str(), Some("UINT8"));
    assert!(rate.get("size").is_none());
}
